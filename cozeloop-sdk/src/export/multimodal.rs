//! Structural detection of model calls and extraction of inline files.
//!
//! A model input is an object with a `messages` array whose entries carry a
//! string `role`. When present, `tools` must be an array of objects with a
//! string `type` (function tools also name their function) and
//! `tool_choice` must be a string or an object with a string `type`.
//!
//! A model output is an object with a `choices` array whose entries carry a
//! `finish_reason` and a `message` object.
//!
//! Message content is a list of parts, taken from `parts` or from an
//! array-valued `content`. `image_url` and `file_url` parts whose URL is a
//! base64 `data:` URI are decoded and replaced by a storage key.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use cozeloop::loop_debug;
use rand::Rng;
use serde_json::{Map, Value};

use crate::export::model::{Attachment, UploadFile};

const IMAGE_URL: &str = "image_url";
const FILE_URL: &str = "file_url";

/// Returns `true` when `value` has the shape of a chat model request.
pub fn is_model_input(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    let Some(messages) = object.get("messages").and_then(Value::as_array) else {
        return false;
    };
    if !messages.iter().all(is_message) {
        return false;
    }
    if let Some(tools) = object.get("tools") {
        let valid = tools
            .as_array()
            .is_some_and(|tools| tools.iter().all(is_tool));
        if !valid {
            return false;
        }
    }
    match object.get("tool_choice") {
        None | Some(Value::String(_)) => true,
        Some(Value::Object(choice)) => choice.get("type").is_some_and(Value::is_string),
        Some(_) => false,
    }
}

/// Returns `true` when `value` has the shape of a chat model response.
pub fn is_model_output(value: &Value) -> bool {
    value
        .get("choices")
        .and_then(Value::as_array)
        .is_some_and(|choices| {
            choices.iter().all(|choice| {
                choice
                    .as_object()
                    .is_some_and(|choice| {
                        choice.contains_key("finish_reason")
                            && choice.get("message").is_some_and(Value::is_object)
                    })
            })
        })
}

fn is_message(message: &Value) -> bool {
    message.get("role").is_some_and(Value::is_string)
}

fn is_tool(tool: &Value) -> bool {
    match tool.get("type").and_then(Value::as_str) {
        Some("function") => tool
            .get("function")
            .and_then(|function| function.get("name"))
            .is_some_and(Value::is_string),
        Some(_) => true,
        None => false,
    }
}

/// Offloads the inline files of a detected model input or output.
///
/// Every extracted file is pushed to `files` and described in
/// `attachments`; its data URI is replaced by the storage key.
pub(crate) fn extract_files(
    value: &mut Value,
    field: &str,
    key_prefix: &str,
    files: &mut Vec<UploadFile>,
    attachments: &mut Vec<Attachment>,
) {
    let mut extractor = Extractor {
        field,
        key_prefix,
        files,
        attachments,
    };

    if is_model_input(value) {
        if let Some(messages) = value.get_mut("messages").and_then(Value::as_array_mut) {
            for message in messages {
                extractor.message(message);
            }
        }
    } else if is_model_output(value) {
        if let Some(choices) = value.get_mut("choices").and_then(Value::as_array_mut) {
            for choice in choices {
                if let Some(message) = choice.get_mut("message") {
                    extractor.message(message);
                }
            }
        }
    }
}

struct Extractor<'a> {
    field: &'a str,
    key_prefix: &'a str,
    files: &'a mut Vec<UploadFile>,
    attachments: &'a mut Vec<Attachment>,
}

impl Extractor<'_> {
    fn message(&mut self, message: &mut Value) {
        let Some(message) = message.as_object_mut() else {
            return;
        };
        for list in ["parts", "content"] {
            if let Some(parts) = message.get_mut(list).and_then(Value::as_array_mut) {
                for part in parts {
                    if let Some(part) = part.as_object_mut() {
                        self.part(part);
                    }
                }
            }
        }
    }

    fn part(&mut self, part: &mut Map<String, Value>) {
        let kind = match part.get("type").and_then(Value::as_str) {
            Some(IMAGE_URL) => IMAGE_URL,
            Some(FILE_URL) => FILE_URL,
            _ => return,
        };
        let Some(target) = part.get_mut(kind).and_then(Value::as_object_mut) else {
            return;
        };
        let Some((content_type, data)) = target
            .get("url")
            .and_then(Value::as_str)
            .and_then(decode_data_uri)
        else {
            return;
        };

        let label = if kind == IMAGE_URL { "image" } else { "file" };
        let tos_key = format!(
            "{}_{}_{}_{}",
            self.key_prefix,
            self.field,
            label,
            random_suffix()
        );
        let name = target
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        target.insert("url".to_string(), Value::String(tos_key.clone()));

        self.attachments.push(Attachment {
            field: self.field.to_string(),
            name,
            kind: label.to_string(),
            tos_key: tos_key.clone(),
        });
        self.files.push(UploadFile {
            tos_key,
            data,
            content_type,
        });
    }
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and bytes.
fn decode_data_uri(url: &str) -> Option<(String, Bytes)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let content_type = meta.strip_suffix(";base64")?;
    match STANDARD.decode(payload) {
        Ok(data) => Some((content_type.to_string(), Bytes::from(data))),
        Err(err) => {
            loop_debug!(name: "SpanConverter.InvalidDataUri", reason = format!("{err}"));
            None
        }
    }
}

fn random_suffix() -> String {
    let bits: u64 = rand::rng().random();
    format!("{:012x}", bits & 0xffff_ffff_ffff)
}
