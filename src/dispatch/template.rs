//! Message personalization.

use crate::config::Channel;
use crate::contacts::Contact;

/// Replace `{{name}}` and `{name}` with `name`.
pub fn personalize(template: &str, name: &str) -> String {
    template.replace("{{name}}", name).replace("{name}", name)
}

/// Build the text body for `contact`.
///
/// A per-row message replaces the template. Greeting channels prefix
/// `Hello {name},` and a blank line, except that an empty template with an
/// attachment yields an empty body so the file goes out without text.
pub fn render_message(channel: Channel, template: &str, contact: &Contact, has_attachment: bool) -> String {
    let source = contact.custom_message.as_deref().unwrap_or(template);
    let body = personalize(source, &contact.display_name);

    if body.trim().is_empty() && has_attachment {
        return String::new();
    }
    if channel.greets() {
        format!("Hello {},\n\n{body}", contact.display_name)
    } else {
        body
    }
}
