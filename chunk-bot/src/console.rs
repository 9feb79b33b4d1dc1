//! Line protocol for the console gateway.
//!
//! Input: one event per line, `<user_id> <channel_id> <text...>`.
//! Output: `[<channel_id>] <reply>` lines, with reactions as `(+<emoji>)`.

use crate::dispatcher::{InboundEvent, Reply, SideAction};

/// Parse one input line. `None` for blank or incomplete lines.
#[must_use]
pub fn parse_line(line: &str, seq: u64) -> Option<InboundEvent> {
    let line = line.trim();
    let (user, rest) = line.split_once(char::is_whitespace)?;
    let (channel, text) = rest.trim_start().split_once(char::is_whitespace)?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(InboundEvent::new(user, channel, text).with_message_id(format!("console-{seq}")))
}

/// Render a reply for the terminal. `None` when there is nothing to show.
#[must_use]
pub fn render(event: &InboundEvent, reply: &Reply) -> Option<String> {
    if reply.is_silent() {
        return None;
    }
    let mut out = format!("[{}]", event.channel);
    if let Some(SideAction::React(emoji)) = reply.action {
        out.push_str(&format!(" (+{emoji})"));
    }
    if let Some(text) = &reply.text {
        for (i, line) in text.lines().enumerate() {
            if i > 0 {
                out.push('\n');
                out.push_str(&" ".repeat(event.channel.as_str().len() + 2));
            }
            out.push(' ');
            out.push_str(line);
        }
    }
    Some(out)
}
