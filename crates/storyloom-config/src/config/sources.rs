use std::collections::BTreeMap;

use strum::IntoEnumIterator;

use super::{Config, ConfigSource, ModelRole};

impl Config {
    fn source_label(&self, key: &str) -> String {
        self.source_attribution
            .get(key)
            .copied()
            .unwrap_or(ConfigSource::Default)
            .to_string()
    }

    /// Effective configuration as `key -> (value, source)`.
    ///
    /// Unset optional values are omitted. API keys are never included; only
    /// the name of the variable that holds one.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut out = BTreeMap::new();
        let mut add = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                out.insert(key.to_string(), (v, self.source_label(key)));
            }
        };

        let g = &self.generation;
        add("seed", g.seed.map(|v| v.to_string()));
        add("quality_threshold", g.quality_threshold.map(|v| v.to_string()));
        add("max_chapters", g.max_chapters.map(|v| v.to_string()));
        add("extraction_attempts", g.extraction_attempts.map(|v| v.to_string()));
        add("stage_min_words", g.stage_min_words.map(|v| v.to_string()));

        let r = &self.revisions;
        add("outline_min", r.outline_min.map(|v| v.to_string()));
        add("outline_max", r.outline_max.map(|v| v.to_string()));
        add("chapter_min", r.chapter_min.map(|v| v.to_string()));
        add("chapter_max", r.chapter_max.map(|v| v.to_string()));
        add("chapter_enabled", r.chapter_enabled.map(|v| v.to_string()));

        let p = &self.passes;
        add("expand_outline", p.expand_outline.map(|v| v.to_string()));
        add("scene_pipeline", p.scene_pipeline.map(|v| v.to_string()));
        add("edit", p.edit.map(|v| v.to_string()));
        add("scrub", p.scrub.map(|v| v.to_string()));
        add("translate", p.translate.clone());
        add("translate_prompt", p.translate_prompt.clone());

        add("models.default", self.models.default.clone());
        for role in ModelRole::iter() {
            add(&format!("models.{}", role.key()), self.models.get(role).cloned());
        }

        add("llm_provider", Some(self.provider().to_string()));
        add("llm_timeout_secs", self.llm.timeout_secs.map(|v| v.to_string()));
        if let Some(or) = &self.llm.openrouter {
            add("llm_api_key_env", or.api_key_env.clone());
            add("llm_base_url", or.base_url.clone());
            add("llm_model", or.model.clone());
            add("llm_max_tokens", or.max_tokens.map(|v| v.to_string()));
            add("llm_temperature", or.temperature.map(|v| v.to_string()));
            add("llm_budget", or.budget.map(|v| v.to_string()));
        }

        add("output_dir", self.output.dir.clone());
        add("checkpoint_dir", self.output.checkpoint_dir.clone());

        out
    }
}
