use serde::{Deserialize, Serialize};

use super::composer::RenderContext;

/// Rendered alert ready for a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template '{template}' failed to render: {reason}")]
    Template { template: String, reason: String },
}

/// Turns a composed context into message bodies (template engines plug in here).
pub trait MessageRenderer: Send + Sync {
    fn render(&self, context: &RenderContext) -> Result<RenderedMessage, RenderError>;
}

/// Built-in renderer producing a short subject with matching HTML and text bodies.
#[derive(Debug, Clone, Default)]
pub struct StandardRenderer;

impl MessageRenderer for StandardRenderer {
    fn render(&self, context: &RenderContext) -> Result<RenderedMessage, RenderError> {
        let subject = format!(
            "[{}] {} budget for {}",
            context.tier_label, context.category_name, context.reference_month
        );

        let usage_line = match &context.usage_percent_display {
            Some(percent) => format!(
                "{} of {} used ({percent})",
                context.consumption_display, context.limit_display
            ),
            None => format!("{} spent, no monthly limit set", context.consumption_display),
        };
        let threshold_line = context
            .triggered_threshold_display
            .as_ref()
            .map(|threshold| format!("Alert threshold reached: {threshold}"));

        let mut text = String::new();
        text.push_str(&subject);
        text.push_str("\n\n");
        text.push_str(context.tier_description);
        text.push('\n');
        text.push_str(&usage_line);
        text.push('\n');
        text.push_str(&format!("Remaining: {}\n", context.remaining_display));
        if let Some(line) = &threshold_line {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(&format!(
            "\nReview the budget: {}\nThis link expires at {}.\n",
            context.access_link, context.link_expires_at
        ));

        let mut html = String::new();
        html.push_str(&format!(
            "<h2 style=\"color:{}\">{}</h2>",
            context.tier_color,
            escape_html(&subject)
        ));
        html.push_str(&format!("<p>{}</p>", escape_html(context.tier_description)));
        html.push_str(&format!("<p>{}</p>", escape_html(&usage_line)));
        html.push_str(&format!(
            "<p>Remaining: {}</p>",
            escape_html(&context.remaining_display)
        ));
        if let Some(line) = &threshold_line {
            html.push_str(&format!("<p>{}</p>", escape_html(line)));
        }
        html.push_str(&format!(
            "<p><a href=\"{}\">Review the budget</a> (link expires at {})</p>",
            escape_html(&context.access_link),
            escape_html(&context.link_expires_at)
        ));

        Ok(RenderedMessage {
            subject,
            html,
            text,
        })
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
