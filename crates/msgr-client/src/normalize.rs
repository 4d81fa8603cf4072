//! Outgoing text normalization.
//!
//! Message bodies pass through a [`TextNormalizer`] before SEND. The
//! built-in [`WhitespaceNormalizer`] collapses runs of whitespace locally;
//! [`SoapNormalizer`] asks a remote `convert_text` SOAP operation to do it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use msgr_core::{MsgrError, MsgrResult, MAX_FIELD_LEN};

/// Rewrites a message body before it is sent.
pub trait TextNormalizer: Send + Sync {
    fn normalize<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = MsgrResult<String>> + Send + 'a>>;
}

/// Collapse whitespace runs to one space and trim both ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Longest prefix of `body` that fits one wire field, cut on a char boundary.
pub fn truncate_body(body: &str) -> &str {
    if body.len() <= MAX_FIELD_LEN {
        return body;
    }
    let mut end = MAX_FIELD_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceNormalizer;

impl TextNormalizer for WhitespaceNormalizer {
    fn normalize<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = MsgrResult<String>> + Send + 'a>> {
        Box::pin(async move { Ok(collapse_whitespace(text)) })
    }
}

const SOAP_NAMESPACE: &str = "http://tests.python-zeep.org/";
const RESULT_ELEMENT: &str = "convert_textResult";

/// Calls the `convert_text` operation of a SOAP 1.1 service.
#[derive(Debug, Clone)]
pub struct SoapNormalizer {
    http: reqwest::Client,
    url: String,
}

impl SoapNormalizer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> MsgrResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MsgrError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn convert(&self, text: &str) -> MsgrResult<String> {
        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "\"convert_text\"")
            .body(envelope(text))
            .send()
            .await
            .map_err(|e| MsgrError::Transport(format!("normalizer request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MsgrError::Transport(format!(
                "normalizer returned HTTP {status}"
            )));
        }

        let xml = response
            .text()
            .await
            .map_err(|e| MsgrError::Transport(format!("normalizer response unreadable: {e}")))?;
        extract_result(&xml)
            .ok_or_else(|| MsgrError::Other("normalizer response has no convert_textResult".into()))
    }
}

impl TextNormalizer for SoapNormalizer {
    fn normalize<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = MsgrResult<String>> + Send + 'a>> {
        Box::pin(self.convert(text))
    }
}

fn envelope(text: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap11env:Envelope xmlns:soap11env="http://schemas.xmlsoap.org/soap/envelope/" xmlns:tns="{ns}">"#,
            "<soap11env:Body><tns:convert_text><tns:text>{text}</tns:text></tns:convert_text></soap11env:Body>",
            "</soap11env:Envelope>"
        ),
        ns = SOAP_NAMESPACE,
        text = escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolve the predefined entities and numeric character references.
/// Anything unrecognised is kept as written.
fn unescape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let c = match &rest[1..semi] {
                "lt" => '<',
                "gt" => '>',
                "amp" => '&',
                "quot" => '"',
                "apos" => '\'',
                reference => char_reference(reference)?,
            };
            Some((c, semi + 1))
        });
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// `#10` or `#xA` to the character it names.
fn char_reference(reference: &str) -> Option<char> {
    let digits = reference.strip_prefix('#')?;
    let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}

/// Text content of the first `convert_textResult` element, any prefix.
/// CDATA sections are taken verbatim; the content ends at the first tag.
fn extract_result(xml: &str) -> Option<String> {
    let start = xml.find(RESULT_ELEMENT)?;
    let tag = &xml[start..];
    let open_end = tag.find('>')?;
    if tag[..open_end].ends_with('/') {
        return Some(String::new());
    }

    let mut content = &tag[open_end + 1..];
    let mut out = String::new();
    loop {
        if let Some(cdata) = content.strip_prefix("<![CDATA[") {
            let end = cdata.find("]]>")?;
            out.push_str(&cdata[..end]);
            content = &cdata[end + 3..];
        } else if content.starts_with('<') {
            return Some(out);
        } else {
            let end = content.find('<')?;
            out.push_str(&unescape_xml(&content[..end]));
            content = &content[end..];
        }
    }
}
