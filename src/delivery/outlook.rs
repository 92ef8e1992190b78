use super::{Deliver, DeliveryError};
use crate::draft::OutgoingMessage;
use async_trait::async_trait;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Opens a pre-filled draft in Outlook for Mac through `osascript`.
pub struct OutlookDelivery {
    recipient_name: String,
}

impl Default for OutlookDelivery {
    fn default() -> Self {
        Self {
            recipient_name: "D S".to_string(),
        }
    }
}

impl OutlookDelivery {
    /// The AppleScript that builds the draft from `message` and the
    /// attachment files already written to `files`.
    pub fn script(&self, message: &OutgoingMessage, files: &[PathBuf]) -> String {
        let (subject, body) = message.subject_and_body();
        let mut script = format!(
            "tell application \"Microsoft Outlook\"\n\
             \tset newMessage to make new outgoing message with properties {{subject:\"{}\", content:\"{}\"}}\n\
             \tmake new recipient at newMessage with properties {{email address:{{name:\"{}\", address:\"{}\"}}}}\n\
             \ttell newMessage\n",
            applescript_string(subject),
            applescript_string(body),
            applescript_string(&self.recipient_name),
            applescript_string(&message.recipient),
        );
        for file in files {
            script.push_str(&format!(
                "\t\tmake new attachment with properties {{file:POSIX file \"{}\"}}\n",
                applescript_string(&file.to_string_lossy())
            ));
        }
        script.push_str("\tend tell\n\topen newMessage\nend tell\n");
        script
    }
}

/// Escape text for an AppleScript string literal (JSON escaping without
/// the surrounding quotes).
fn applescript_string(s: &str) -> String {
    let json = serde_json::to_string(s).unwrap_or_default();
    json.get(1..json.len().saturating_sub(1))
        .unwrap_or_default()
        .to_string()
}

fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

fn write_attachments(dir: &Path, message: &OutgoingMessage) -> std::io::Result<Vec<PathBuf>> {
    message
        .attachments
        .iter()
        .map(|att| {
            let path = dir.join(safe_file_name(&att.filename));
            fs::write(&path, &att.bytes)?;
            Ok(path)
        })
        .collect()
}

#[async_trait]
impl Deliver for OutlookDelivery {
    fn name(&self) -> &'static str {
        "outlook"
    }

    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        if !cfg!(target_os = "macos") {
            return Err(DeliveryError::Unavailable(
                "Outlook automation needs macOS".to_string(),
            ));
        }

        // Removed when `staging` drops, whatever happens below.
        let staging = tempfile::tempdir()?;
        let files = write_attachments(staging.path(), message)?;
        let script = self.script(message, &files);

        let output = Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DeliveryError::Unavailable("osascript not found".to_string()),
                _ => DeliveryError::Io(e),
            })?;

        if !output.status.success() {
            return Err(DeliveryError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        info!(attachments = files.len(), "Outlook draft opened");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{Attachment, RECIPIENT};

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            subject: "Response to: inv \"7\".pdf".to_string(),
            recipient: RECIPIENT.to_string(),
            sender: None,
            body_text: "line one\nline \\ two".to_string(),
            attachments: vec![Attachment {
                filename: "../inv.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                bytes: b"%PDF".to_vec(),
            }],
        }
    }

    #[test]
    fn test_applescript_escaping() {
        assert_eq!(applescript_string("a \"b\"\n"), "a \\\"b\\\"\\n");
        assert_eq!(applescript_string("ends with \""), "ends with \\\"");
    }

    #[test]
    fn test_script_contents() {
        let files = vec![PathBuf::from("/tmp/x/inv.pdf")];
        let script = OutlookDelivery::default().script(&message(), &files);
        assert!(script.contains("subject:\"Response to: inv \\\"7\\\".pdf\""));
        assert!(script.contains("content:\"line one\\nline \\\\ two\""));
        assert!(script.contains("address:\"DSao@techstyle.com\""));
        assert!(script.contains("file:POSIX file \"/tmp/x/inv.pdf\""));
        assert!(script.trim_end().ends_with("end tell"));
    }

    #[test]
    fn test_attachments_staged_and_cleaned() {
        let staging = tempfile::tempdir().unwrap();
        let root = staging.path().to_path_buf();
        let files = write_attachments(&root, &message()).unwrap();
        assert_eq!(files, vec![root.join(".._inv.pdf")]);
        assert_eq!(fs::read(&files[0]).unwrap(), b"%PDF");

        drop(staging);
        assert!(!root.exists());
    }
}
