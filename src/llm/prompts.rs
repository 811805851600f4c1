//! System prompts and template classification

use serde::Deserialize;
use tracing::{debug, warn};

use super::client::CompletionModel;
use super::types::ChatMessage;
use crate::store::TemplateKind;

/// System prompt for the coding agent, parameterized by the project template
pub fn system_prompt(template: TemplateKind) -> String {
    let specifics = match template {
        TemplateKind::NextJs => {
            "- Use App Router conventions (app directory, server components by default)\n\
             - Add 'use client' when using hooks or browser APIs\n\
             - Use next/image for images and next/link for navigation"
        }
        TemplateKind::React => {
            "- Write functional components with hooks\n\
             - Use React Router if the app needs navigation\n\
             - Keep state close to where it is used"
        }
    };

    format!(
        "You are a code execution agent working inside a web project. When the user asks for \
         something, use the tools immediately and finish the whole task before replying. \
         Reply with a short summary only once the work is done.\n\
         \n\
         ## Project\n\
         - Framework: {framework}\n\
         - Styling: Tailwind CSS (already configured)\n\
         - UI components: shadcn/ui under components/ui\n\
         - Language: TypeScript\n\
         \n\
         ## Tools\n\
         - list_files before assuming the project structure\n\
         - read_file before modifying a file\n\
         - patch_file for small targeted edits, write_file for new or rewritten files\n\
         - search_files to find usages or patterns\n\
         - execute_command for package installs and scripts (e.g. 'npm install zustand')\n\
         - run_code to check logic in Python\n\
         \n\
         ## {label} specifics\n\
         {specifics}\n\
         \n\
         Only ask a clarifying question when the request is genuinely ambiguous.",
        framework = template.framework(),
        label = match template {
            TemplateKind::NextJs => "Next.js",
            TemplateKind::React => "React",
        },
        specifics = specifics,
    )
}

const CLASSIFY_PROMPT: &str = "Decide whether the user's request needs a Next.js project or a React project. \
Choose \"nextjs\" only if the user explicitly asks for Next.js or needs server-side rendering or API routes; \
otherwise choose \"react\". Reply with JSON only: {\"type\": \"react\"} or {\"type\": \"nextjs\"}.";

#[derive(Deserialize)]
struct Classification {
    #[serde(rename = "type")]
    kind: String,
}

/// Pick a project template for a first prompt
///
/// Never fails: an empty prompt, a model error or an unparseable answer all
/// fall back to [`TemplateKind::React`].
pub async fn classify_template(model: &dyn CompletionModel, prompt: &str) -> TemplateKind {
    if prompt.trim().is_empty() {
        return TemplateKind::React;
    }

    let messages = [ChatMessage::system(CLASSIFY_PROMPT), ChatMessage::user(prompt)];
    let reply = match model.complete(&messages, &[]).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Template classification failed, using react");
            return TemplateKind::React;
        }
    };

    let template = parse_classification(reply.text()).unwrap_or_default();
    debug!(template = %template, "Classified project template");
    template
}

/// Parse a `{"type": ...}` answer, tolerating surrounding prose or code fences
fn parse_classification(text: &str) -> Option<TemplateKind> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: Classification = serde_json::from_str(&text[start..=end]).ok()?;
    parsed.kind.parse().ok()
}
