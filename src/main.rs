//! storyloom CLI binary
//!
//! All logic lives in the library; main.rs only maps the exit code.

fn main() {
    // cli::run() handles all output, including errors
    if let Err(code) = storyloom::cli::run() {
        std::process::exit(code.as_i32());
    }
}
