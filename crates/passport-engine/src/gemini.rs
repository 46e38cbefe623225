use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use passport_contracts::pipeline::{GeneratedPhoto, ValidationReport};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::studio::{PhotoGenerator, PhotoValidator, Studio};
use crate::truncate_text;

const GENERATION_PROMPT: &str = "\
Turn this photo into a professional passport photo. Keep the person's identity, \
facial features and expression exactly as they are. Crop to head and shoulders with \
the face centered and looking straight at the camera, eyes open and level. Replace \
the background with a plain, evenly lit off-white or light grey. Remove shadows on \
the face and background, keep natural skin tones and balanced exposure. Do not add \
accessories, retouch features, or change clothing. Output a single portrait image \
with a 35:45 aspect ratio.";

const VALIDATION_PROMPT: &str = "\
You are checking a photo against common passport photo requirements. Review the image \
for: plain light background, even lighting without shadows, face centered and facing \
forward, neutral expression with mouth closed, eyes open and visible, no glasses glare \
or head coverings, head size and framing, sharp focus and natural colours. Answer with \
one summary line stating whether the photo appears compliant, then one line per \
requirement starting with \"- \" giving its status and a short reason. Plain text only.";

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub text_model: String,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            image_model: "gemini-2.5-flash-image-preview".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            request_timeout: Duration::from_secs(90),
            transport_retries: 2,
            retry_backoff: Duration::from_millis(1200),
        }
    }
}

/// Both collaborators backed by the Gemini `generateContent` REST API.
pub struct GeminiStudio {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiStudio {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set"),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model_path
        )
    }

    fn post_with_transport_retries(&self, endpoint: &str, payload: &Value) -> Result<HttpResponse> {
        let api_key = self.api_key()?;
        let max_retries = self.config.transport_retries;
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(self.config.request_timeout)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let retryable = raw.is_timeout() || raw.is_connect() || raw.is_request();
                    // The API key rides in the query string; keep the URL out
                    // of the message.
                    let err = anyhow::Error::new(raw.without_url())
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !retryable || attempt >= max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries,
                        "Gemini transport retry after transient request failure"
                    );
                    thread::sleep(self.config.retry_backoff * attempt as u32);
                }
            }
        }
    }

    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint_for_model(model);
        tracing::debug!(model, "calling Gemini generateContent");
        let response = self.post_with_transport_retries(&endpoint, payload)?;
        let parsed = response_json_or_error(response)?;
        if let Some(reason) = parsed
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            bail!("Gemini blocked the request ({reason})");
        }
        Ok(parsed)
    }
}

impl PhotoGenerator for GeminiStudio {
    fn generate(&self, base64: &str, source_mime_type: &str) -> Result<GeneratedPhoto> {
        let payload = generation_payload(base64, source_mime_type);
        let response = self.generate_content(&self.config.image_model, &payload)?;
        extract_inline_image(&response)
    }
}

impl PhotoValidator for GeminiStudio {
    fn validate(&self, base64: &str, mime_type: &str) -> Result<ValidationReport> {
        let payload = validation_payload(base64, mime_type);
        let response = self.generate_content(&self.config.text_model, &payload)?;
        let text = extract_text(&response);
        if text.is_empty() {
            bail!("Gemini returned an empty compliance report");
        }
        Ok(ValidationReport::new(text))
    }
}

impl Studio for GeminiStudio {
    fn name(&self) -> &str {
        "gemini"
    }
}

fn image_part(base64: &str, mime_type: &str) -> Value {
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": base64,
        }
    })
}

fn generation_payload(base64: &str, mime_type: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [image_part(base64, mime_type), { "text": GENERATION_PROMPT }],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"],
        },
    })
}

fn validation_payload(base64: &str, mime_type: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [image_part(base64, mime_type), { "text": VALIDATION_PROMPT }],
        }],
        "generationConfig": {
            "temperature": 0.2,
        },
    })
}

fn response_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.get("content"))
        .filter_map(|content| content.get("parts"))
        .filter_map(Value::as_array)
        .flatten()
        .cloned()
        .collect()
}

fn extract_inline_image(response: &Value) -> Result<GeneratedPhoto> {
    for part in response_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("image/png");
        return Ok(GeneratedPhoto::new(data, mime_type));
    }

    let text = extract_text(response);
    if text.is_empty() {
        bail!("Gemini returned no image");
    }
    bail!("Gemini returned no image: {}", truncate_text(&text, 200))
}

fn extract_text(response: &Value) -> String {
    response_parts(response)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .context("Gemini response body read failed")?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .get("error")
                    .and_then(|error| error.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);
        bail!(
            "Gemini request failed ({code}): {}",
            truncate_text(&message, 512)
        );
    }
    serde_json::from_str(&body).context("Gemini returned invalid JSON payload")
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    use super::*;

    type Received = Result<(String, Value)>;

    /// Answers exactly one HTTP request with `status` and `body`, handing
    /// back the request line and JSON body it received.
    fn serve_once(status: &'static str, body: String) -> Result<(String, JoinHandle<Received>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}/v1beta", listener.local_addr()?);
        let handle = thread::spawn(move || -> Received {
            let (stream, _) = listener.accept()?;
            let mut reader = BufReader::new(stream.try_clone()?);
            let mut request_line = String::new();
            reader.read_line(&mut request_line)?;
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header)?;
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse()?;
                    }
                }
            }
            let mut raw_body = vec![0u8; content_length];
            reader.read_exact(&mut raw_body)?;
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )?;
            stream.flush()?;
            Ok((request_line.trim().to_string(), serde_json::from_slice(&raw_body)?))
        });
        Ok((base, handle))
    }

    fn studio_for(base: String) -> GeminiStudio {
        GeminiStudio::new(GeminiConfig {
            api_key: Some("test-key".to_string()),
            api_base: base,
            transport_retries: 0,
            request_timeout: Duration::from_secs(10),
            ..GeminiConfig::default()
        })
    }

    fn join(handle: JoinHandle<Result<(String, Value)>>) -> Result<(String, Value)> {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("test server panicked"))?
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() {
        let studio = GeminiStudio::new(GeminiConfig {
            api_base: "https://example.test/v1beta/".to_string(),
            ..GeminiConfig::default()
        });
        assert_eq!(
            studio.endpoint_for_model("gemini-2.5-flash"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            studio.endpoint_for_model(" models/custom "),
            "https://example.test/v1beta/models/custom:generateContent"
        );
    }

    #[test]
    fn missing_api_key_fails_before_any_request() {
        let studio = GeminiStudio::new(GeminiConfig::default());
        let err = studio.generate("AA==", "image/jpeg").unwrap_err();
        assert_eq!(err.to_string(), "GEMINI_API_KEY or GOOGLE_API_KEY not set");
    }

    #[test]
    fn generation_payload_sends_photo_then_prompt() {
        let payload = generation_payload("QUJD", "image/webp");
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/webp");
        assert_eq!(parts[0]["inlineData"]["data"], "QUJD");
        assert!(parts[1]["text"]
            .as_str()
            .map(|text| text.contains("passport photo"))
            .unwrap_or(false));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
    }

    #[test]
    fn extract_inline_image_accepts_snake_case_and_defaults_mime() -> Result<()> {
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here you go" },
                    { "inline_data": { "data": "cG5n" } }
                ]}
            }]
        });
        let photo = extract_inline_image(&response)?;
        assert_eq!(photo.base64, "cG5n");
        assert_eq!(photo.mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn extract_inline_image_reports_refusal_text() {
        let response = json!({
            "candidates": [{ "content": { "parts": [{ "text": "I can't edit this photo." }] } }]
        });
        let err = extract_inline_image(&response).unwrap_err();
        assert_eq!(err.to_string(), "Gemini returned no image: I can't edit this photo.");
        assert!(extract_inline_image(&json!({})).is_err());
    }

    #[test]
    fn extract_text_joins_candidate_parts() {
        let response = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "Compliant.\n" },
                { "text": "- Background: plain white" },
                { "text": "   " }
            ]}}]
        });
        assert_eq!(
            extract_text(&response),
            "Compliant.\n- Background: plain white"
        );
    }

    #[test]
    fn generate_round_trips_through_http() -> Result<()> {
        let reply = json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/jpeg", "data": "anBlZw==" } }
            ]}}]
        });
        let (base, server) = serve_once("200 OK", reply.to_string())?;
        let photo = studio_for(base).generate("c2VsZmll", "image/png")?;
        assert_eq!(photo, GeneratedPhoto::new("anBlZw==", "image/jpeg"));

        let (request_line, body) = join(server)?;
        assert!(request_line.starts_with(
            "POST /v1beta/models/gemini-2.5-flash-image-preview:generateContent?key=test-key"
        ));
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], "c2VsZmll");
        Ok(())
    }

    #[test]
    fn validate_uses_text_model_and_returns_report() -> Result<()> {
        let reply = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "Appears compliant.\n- Lighting: even" }
            ]}}]
        });
        let (base, server) = serve_once("200 OK", reply.to_string())?;
        let report = studio_for(base).validate("anBlZw==", "image/jpeg")?;
        assert_eq!(report.summary(), "Appears compliant.");

        let (request_line, _) = join(server)?;
        assert!(request_line.contains("/models/gemini-2.5-flash:generateContent"));
        Ok(())
    }

    #[test]
    fn http_errors_surface_api_message() -> Result<()> {
        let reply = json!({ "error": { "code": 429, "message": "Resource has been exhausted" } });
        let (base, server) = serve_once("429 Too Many Requests", reply.to_string())?;
        let err = studio_for(base).generate("c2VsZmll", "image/png").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Gemini request failed (429): Resource has been exhausted"
        );
        join(server)?;
        Ok(())
    }

    #[test]
    fn blocked_prompt_is_an_error() -> Result<()> {
        let reply = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let (base, server) = serve_once("200 OK", reply.to_string())?;
        let err = studio_for(base).validate("c2VsZmll", "image/png").unwrap_err();
        assert_eq!(err.to_string(), "Gemini blocked the request (SAFETY)");
        join(server)?;
        Ok(())
    }
}
