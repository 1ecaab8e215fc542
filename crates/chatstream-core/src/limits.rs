//! Input limits applied before a user message enters the store.

use crate::error::ValidationError;
use crate::types::FileAttachment;

/// Maximum size of a single attachment (10 MB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of attachments per message.
pub const MAX_ATTACHMENTS: usize = 5;

/// Maximum message length in characters.
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

/// MIME types accepted as attachments.
pub const ALLOWED_FILE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "application/pdf",
    "text/plain",
    "text/markdown",
    "text/csv",
    "text/javascript",
    "text/html",
    "text/css",
    "application/json",
    "application/xml",
    "text/xml",
];

/// Check whether a MIME type may be attached.
#[must_use]
pub fn is_allowed_file_type(mime_type: &str) -> bool {
    ALLOWED_FILE_TYPES.contains(&mime_type)
}

/// Guess a MIME type from a file extension.
///
/// Returns `None` for extensions outside the allow list.
#[must_use]
pub fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "js" | "mjs" => "text/javascript",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => return None,
    };
    Some(mime)
}

/// Validate a single attachment against the size and type limits.
///
/// # Errors
///
/// Returns the first limit the attachment violates.
pub fn validate_attachment(attachment: &FileAttachment) -> Result<(), ValidationError> {
    if attachment.size_bytes > MAX_FILE_SIZE {
        return Err(ValidationError::AttachmentTooLarge {
            name: attachment.name.clone(),
            size: attachment.size_bytes,
            max: MAX_FILE_SIZE,
        });
    }
    if !is_allowed_file_type(&attachment.mime_type) {
        return Err(ValidationError::UnsupportedFileType {
            name: attachment.name.clone(),
            mime_type: attachment.mime_type.clone(),
        });
    }
    Ok(())
}

/// Validate an outgoing user message.
///
/// A message is sendable when it has non-blank content within
/// [`MAX_MESSAGE_LENGTH`] characters and every attachment passes
/// [`validate_attachment`].
///
/// # Errors
///
/// Returns the first limit the message violates.
pub fn validate_message(
    content: &str,
    attachments: &[FileAttachment],
) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }

    let len = content.chars().count();
    if len > MAX_MESSAGE_LENGTH {
        return Err(ValidationError::MessageTooLong {
            len,
            max: MAX_MESSAGE_LENGTH,
        });
    }

    if attachments.len() > MAX_ATTACHMENTS {
        return Err(ValidationError::TooManyAttachments {
            count: attachments.len(),
            max: MAX_ATTACHMENTS,
        });
    }

    attachments.iter().try_for_each(validate_attachment)
}
