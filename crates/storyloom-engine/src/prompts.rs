//! Prompt text.
//!
//! Every prompt is a pure function of its inputs so that control flow can be
//! tested without caring about wording, and so a resumed run can rebuild the
//! exact messages an uninterrupted run would have sent.

use crate::pipeline::StageInput;

/// Shared context for every stage of one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterBrief {
    pub number: usize,
    pub total: usize,
    /// Outline for this chapter only.
    pub plan: String,
    /// Outline for the whole story.
    pub outline: String,
    /// Summary of the preceding chapter; empty for chapter 1.
    pub previous_summary: String,
    pub base_context: String,
}

/// Inputs for rewriting one chapter during the edit pass.
#[derive(Debug, Clone, Copy)]
pub struct EditContext<'a> {
    pub number: usize,
    pub total: usize,
    pub chapter: &'a str,
    pub manuscript: &'a str,
    pub outline: &'a str,
}

#[must_use]
pub fn translate_prompt(prompt: &str, language: &str) -> String {
    format!(
        "Translate the following story prompt into {language}. Keep every detail and \
         instruction intact and reply with the translation only.\n\n<PROMPT>\n{prompt}\n</PROMPT>"
    )
}

#[must_use]
pub fn base_context(prompt: &str) -> String {
    format!(
        "Read the story prompt below and extract any instructions that apply to the whole \
         work rather than to the plot: formatting rules, tone, point of view, length, content \
         limits. List only those instructions. If there are none, say so in one sentence.\n\n\
         <PROMPT>\n{prompt}\n</PROMPT>"
    )
}

#[must_use]
pub fn story_elements(prompt: &str) -> String {
    format!(
        "You are planning a novel from the prompt below. Before any outline is written, \
         describe the story's elements in markdown:\n\
         - Title\n- Genre\n- Themes\n- Pacing and style\n- Setting (time, place, culture)\n\
         - Conflict\n- Symbolism\n- Characters, each with appearance, personality, background \
         and motivation\n\n\
         Be concrete and specific.\n\n<PROMPT>\n{prompt}\n</PROMPT>"
    )
}

#[must_use]
pub fn initial_outline(prompt: &str, elements: &str) -> String {
    format!(
        "Write a complete chapter-by-chapter outline for a novel based on the prompt and \
         story elements below. Use a `# Chapter N` heading for every chapter. For each \
         chapter cover the events, the characters involved and how it moves the main \
         conflict forward. The story must have a clear beginning, middle and end.\n\n\
         <PROMPT>\n{prompt}\n</PROMPT>\n\n<ELEMENTS>\n{elements}\n</ELEMENTS>"
    )
}

#[must_use]
pub fn outline_critique(outline: &str, prompt: &str) -> String {
    format!(
        "Critique the outline below as an experienced editor. Comment on:\n\
         - whether it follows the prompt\n- whether each chapter has enough detail\n\
         - pacing, plot holes and weak transitions\n- whether characters are developed\n\n\
         Give concrete, actionable suggestions.\n\n<OUTLINE>\n{outline}\n</OUTLINE>\n\n\
         <PROMPT>\n{prompt}\n</PROMPT>"
    )
}

#[must_use]
pub fn outline_rating(outline: &str) -> String {
    format!(
        "Decide whether the outline below is complete and ready to be turned into a novel: \
         every chapter has a heading and detailed events, and the story has an ending. \
         Also score its overall quality from 0 to 100.\n\n\
         Reply with JSON only, in the form {{\"IsComplete\": true or false, \"Score\": <0-100>}}.\n\n\
         <OUTLINE>\n{outline}\n</OUTLINE>"
    )
}

#[must_use]
pub fn outline_revision(outline: &str, feedback: &str) -> String {
    format!(
        "Rewrite the outline below, applying the editor's feedback. Keep the `# Chapter N` \
         headings and add detail wherever the feedback asks for it. Reply with the full \
         revised outline only.\n\n<OUTLINE>\n{outline}\n</OUTLINE>\n\n\
         <FEEDBACK>\n{feedback}\n</FEEDBACK>"
    )
}

#[must_use]
pub fn story_info(outline: &str) -> String {
    format!(
        "Based on the outline below, give the story a title, a one-paragraph summary, a few \
         comma-separated tags and a quality score from 0 to 100.\n\n\
         Reply with JSON only, in the form {{\"Title\": \"...\", \"Summary\": \"...\", \
         \"Tags\": \"...\", \"Score\": <0-100>}}.\n\n<OUTLINE>\n{outline}\n</OUTLINE>"
    )
}

#[must_use]
pub fn chapter_count(outline: &str) -> String {
    format!(
        "How many chapters does the outline below contain?\n\n\
         Reply with JSON only, in the form {{\"TotalChapters\": <number>}}.\n\n\
         <OUTLINE>\n{outline}\n</OUTLINE>"
    )
}

/// Request appended to the outline conversation for chapter `number`.
#[must_use]
pub fn chapter_outline_request(number: usize, total: usize) -> String {
    format!(
        "Expand the outline for chapter {number} of {total} into a detailed plan. Cover each \
         scene in order, who is present, what they want, what happens, and how the chapter \
         ends. Reply with the plan for chapter {number} only."
    )
}

#[must_use]
pub fn chapter_system(number: usize, total: usize) -> String {
    format!(
        "You are a novelist writing chapter {number} of {total} of a book. You follow the \
         outline faithfully, write vivid prose, and never summarize events that should be \
         shown."
    )
}

#[must_use]
pub fn chapter_plan(outline: &str, number: usize) -> String {
    format!(
        "From the outline below, extract everything that belongs to chapter {number}. Do not \
         add events from other chapters.\n\n<OUTLINE>\n{outline}\n</OUTLINE>"
    )
}

#[must_use]
pub fn chapter_summary(previous_chapter: &str, number: usize) -> String {
    format!(
        "Summarize the chapter below so that chapter {number} can pick up where it left \
         off. Include where every character is, what they know, and any unresolved \
         threads.\n\n<CHAPTER>\n{previous_chapter}\n</CHAPTER>"
    )
}

fn brief_block(brief: &ChapterBrief) -> String {
    let mut block = format!(
        "<CHAPTER_OUTLINE>\n{}\n</CHAPTER_OUTLINE>\n\n<STORY_OUTLINE>\n{}\n</STORY_OUTLINE>",
        brief.plan, brief.outline
    );
    if !brief.previous_summary.is_empty() {
        block.push_str(&format!(
            "\n\n<PREVIOUS_CHAPTER>\n{}\n</PREVIOUS_CHAPTER>",
            brief.previous_summary
        ));
    }
    if !brief.base_context.is_empty() {
        block.push_str(&format!(
            "\n\n<INSTRUCTIONS>\n{}\n</INSTRUCTIONS>",
            brief.base_context
        ));
    }
    block
}

fn retry_block(input: &StageInput<'_>) -> String {
    match (input.feedback, input.rejected) {
        (Some(feedback), Some(rejected)) => format!(
            "\n\nA previous draft was rejected. Fix the problems below.\n\n\
             <REJECTED_DRAFT>\n{rejected}\n</REJECTED_DRAFT>\n\n<FEEDBACK>\n{feedback}\n</FEEDBACK>"
        ),
        (Some(feedback), None) => format!("\n\n<FEEDBACK>\n{feedback}\n</FEEDBACK>"),
        _ => String::new(),
    }
}

/// Stage 1: the plot of the chapter.
#[must_use]
pub fn stage_plot(brief: &ChapterBrief, input: &StageInput<'_>) -> String {
    format!(
        "Write the plot of chapter {} of {}. Focus on events and structure; pacing should \
         follow the chapter outline. Do not write dialogue yet.\n\n{}{}",
        brief.number,
        brief.total,
        brief_block(brief),
        retry_block(input)
    )
}

/// Stage 2: deepen characters on top of the plot.
#[must_use]
pub fn stage_character(brief: &ChapterBrief, input: &StageInput<'_>) -> String {
    format!(
        "Rewrite chapter {} of {} below, adding character development: inner thoughts, \
         motivations, reactions and relationships. Keep every plot event.\n\n\
         <CHAPTER_DRAFT>\n{}\n</CHAPTER_DRAFT>\n\n{}{}",
        brief.number,
        brief.total,
        input.previous,
        brief_block(brief),
        retry_block(input)
    )
}

/// Stage 3: add dialogue.
#[must_use]
pub fn stage_dialogue(brief: &ChapterBrief, input: &StageInput<'_>) -> String {
    format!(
        "Rewrite chapter {} of {} below, adding natural dialogue where characters interact. \
         Keep every plot event and character beat. Reply with the chapter text only.\n\n\
         <CHAPTER_DRAFT>\n{}\n</CHAPTER_DRAFT>\n\n{}{}",
        brief.number,
        brief.total,
        input.previous,
        brief_block(brief),
        retry_block(input)
    )
}

#[must_use]
pub fn scene_breakdown(brief: &ChapterBrief, input: &StageInput<'_>) -> String {
    format!(
        "Break the outline of chapter {} into a scene-by-scene outline. For each scene give \
         the setting, the characters present, what happens and how it ends.\n\n{}{}",
        brief.number,
        brief_block(brief),
        retry_block(input)
    )
}

#[must_use]
pub fn scene_list(breakdown: &str) -> String {
    format!(
        "Convert the scene outline below into a JSON list with one entry per scene, each \
         entry holding that scene's full outline text.\n\n\
         Reply with JSON only, in the form {{\"Scenes\": [\"...\", \"...\"]}}.\n\n\
         <SCENES>\n{breakdown}\n</SCENES>"
    )
}

/// Write scene `index` (1-based) of `count`.
///
/// On a retry every scene sees the gate's feedback. Only the breakdown sees
/// the rejected draft.
#[must_use]
pub fn scene_write(
    brief: &ChapterBrief,
    input: &StageInput<'_>,
    scene: &str,
    index: usize,
    count: usize,
) -> String {
    let feedback = input
        .feedback
        .filter(|f| !f.trim().is_empty())
        .map(|f| {
            format!("\n\nThe last draft of this chapter was rejected.\n\n<FEEDBACK>\n{f}\n</FEEDBACK>")
        })
        .unwrap_or_default();
    format!(
        "Write scene {index} of {count} of chapter {} in full prose, with description, \
         action and dialogue. Reply with the scene text only.\n\n<SCENE_OUTLINE>\n{scene}\n\
         </SCENE_OUTLINE>\n\n{}{feedback}",
        brief.number,
        brief_block(brief)
    )
}

#[must_use]
pub fn summarize_work(content: &str) -> String {
    format!(
        "Summarize the chapter draft below in a short list of the events that happen, in \
         order.\n\n<DRAFT>\n{content}\n</DRAFT>"
    )
}

#[must_use]
pub fn summarize_outline(plan: &str) -> String {
    format!(
        "Summarize the chapter outline below in a short list of the events it calls for, in \
         order.\n\n<OUTLINE>\n{plan}\n</OUTLINE>"
    )
}

#[must_use]
pub fn compare_summaries(work: &str, outline: &str) -> String {
    format!(
        "Compare the summary of a chapter draft with the summary of its outline. Did the \
         draft follow the outline? Suggest what should change if it did not.\n\n\
         Reply with JSON only, in the form {{\"Suggestions\": \"...\", \"DidFollowOutline\": \
         true or false}}.\n\n<DRAFT_SUMMARY>\n{work}\n</DRAFT_SUMMARY>\n\n\
         <OUTLINE_SUMMARY>\n{outline}\n</OUTLINE_SUMMARY>"
    )
}

/// Feedback for drafts below the minimum length.
#[must_use]
pub fn too_short_feedback(words: usize, min_words: usize) -> String {
    format!(
        "The draft has only {words} words. Write the complete chapter section, at least \
         {min_words} words, without skipping events."
    )
}

#[must_use]
pub fn chapter_critique(chapter: &str, outline: &str) -> String {
    format!(
        "Critique the chapter below as an experienced editor. Comment on pacing, character \
         voice, dialogue, prose quality and whether it follows the outline. Give concrete, \
         actionable suggestions.\n\n<CHAPTER>\n{chapter}\n</CHAPTER>\n\n\
         <OUTLINE>\n{outline}\n</OUTLINE>"
    )
}

#[must_use]
pub fn chapter_rating(chapter: &str) -> String {
    format!(
        "Decide whether the chapter below is complete and publishable: it has no missing \
         scenes, no outline notes, and a coherent ending. Also score its quality from 0 to \
         100.\n\nReply with JSON only, in the form {{\"IsComplete\": true or false, \
         \"Score\": <0-100>}}.\n\n<CHAPTER>\n{chapter}\n</CHAPTER>"
    )
}

#[must_use]
pub fn chapter_revision(chapter: &str, feedback: &str) -> String {
    format!(
        "Revise the chapter below according to the feedback. Keep its events and length. \
         Reply with the revised chapter only.\n\n<CHAPTER>\n{chapter}\n</CHAPTER>\n\n\
         <FEEDBACK>\n{feedback}\n</FEEDBACK>"
    )
}

#[must_use]
pub fn edit_chapter(ctx: &EditContext<'_>) -> String {
    format!(
        "You are editing a finished novel. Rewrite chapter {} of {} so that it is consistent \
         with the rest of the book and the outline: fix continuity errors, repetition and \
         abrupt transitions. Reply with the rewritten chapter only.\n\n\
         <OUTLINE>\n{}\n</OUTLINE>\n\n<BOOK>\n{}\n</BOOK>\n\n<CHAPTER>\n{}\n</CHAPTER>",
        ctx.number, ctx.total, ctx.outline, ctx.manuscript, ctx.chapter
    )
}

#[must_use]
pub fn scrub_chapter(chapter: &str) -> String {
    format!(
        "Clean up the chapter below. Remove leftover outline notes, headings, author \
         comments, editing remarks and anything that is not part of the story itself. Do \
         not change the prose otherwise. Reply with the cleaned chapter only.\n\n\
         <CHAPTER>\n{chapter}\n</CHAPTER>"
    )
}

#[must_use]
pub fn translate_chapter(chapter: &str, language: &str) -> String {
    format!(
        "Translate the chapter below into {language}. Preserve paragraphs, dialogue and tone. \
         Reply with the translation only.\n\n<CHAPTER>\n{chapter}\n</CHAPTER>"
    )
}
