//! Preambles and prompt templates for each generator call.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content changes
//! so telemetry can tie a pull request back to the prompt set that made it.

use std::path::Path;

use crate::strategy::Strategy;

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Summarizer: condenses the repository digest into a short architecture brief.
pub const SUMMARIZER_PREAMBLE: &str = "\
You are a senior engineer onboarding onto an unfamiliar repository. \
You are given a file listing and, when available, the README. \
Write a concise summary (at most 300 words) of what the project does, \
its language and build system, and where the main source code lives. \
Output plain prose, no headings.";

/// Planner: picks the files that must change.
pub const PLANNER_PREAMBLE: &str = "\
You plan code changes. Given a repository summary and a change request, \
list every file that must be created or rewritten to accomplish the request. \
Respond with a JSON array of repository-relative paths, e.g. [\"src/lib.rs\", \"README.md\"]. \
Never use absolute paths, `..`, or anything under `.git/`. \
Output ONLY the JSON array, no commentary.";

/// File writer: produces the complete new content of one file.
pub const FILE_WRITER_PREAMBLE: &str = "\
You write complete source files. You are given a change request, the path of one file, \
and its current content if it exists. Respond with the FULL new content of that file, \
nothing else: no explanations, no diff, no placeholder comments such as \"rest unchanged\". \
A single surrounding code fence is tolerated.";

/// Task enhancer: turns a terse request into an actionable one.
pub const ENHANCER_PREAMBLE: &str = "\
You rewrite change requests for an automated coding agent. Make the request specific, \
unambiguous and self-contained while preserving its intent. Do not invent requirements. \
Respond with the rewritten request only.";

pub fn summarize_prompt(digest: &str) -> String {
    format!("Summarize this repository.\n\n{digest}")
}

pub fn plan_prompt(summary: &str, task: &str) -> String {
    format!(
        "## Repository summary\n{summary}\n\n## Change request\n{task}\n\n\
         Respond with a JSON array of the file paths to create or modify."
    )
}

pub fn file_prompt(path: &Path, existing: Option<&str>, task: &str, strategy: &Strategy) -> String {
    let mut prompt = format!("## Change request\n{task}\n\n## File\n`{}`\n\n", path.display());
    match existing {
        Some(content) => {
            prompt.push_str("## Current content\n```\n");
            prompt.push_str(content);
            if !content.ends_with('\n') {
                prompt.push('\n');
            }
            prompt.push_str("```\n\n");
        }
        None => prompt.push_str("This file does not exist yet; create it.\n\n"),
    }
    if !strategy.guidance.is_empty() {
        prompt.push_str("## Approach\n");
        prompt.push_str(&strategy.guidance);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Respond with the complete new content of the file.");
    prompt
}

pub fn enhance_prompt(task: &str) -> String {
    format!("Rewrite this change request:\n\n{task}")
}
