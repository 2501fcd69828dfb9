use async_trait::async_trait;
use fileflow_core::{
    Part, PartContext, PartError, PartKind, PartOutput, PropertyDescriptor, PropertyKind, Value,
};
use fileflow_runtime::{OutputDefinition, PartFactory, PartMetadata};
use std::collections::HashMap;

/// Calls a webhook. Output 1 on a 2xx response, 2 otherwise.
pub struct WebhookPart {
    client: reqwest::Client,
}

impl WebhookPart {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookPart {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Part for WebhookPart {
    fn part_type(&self) -> &str {
        "http.webhook"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let url = ctx.require_text("url")?;
        let method_value = ctx.property_or("method", Value::String("POST".to_string()));
        let method = method_value.as_str().unwrap_or("POST").to_uppercase();

        ctx.logger.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            _ => return Err(PartError::Configuration(format!("Unsupported method: {}", method))),
        };

        if let Some(Value::Object(headers)) = ctx.properties.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, ctx.substitute(val_str));
                }
            }
        }

        match ctx.properties.get("body") {
            Some(Value::Json(json)) => request = request.json(json),
            Some(Value::String(text)) if !text.is_empty() => {
                request = request.body(ctx.substitute(text))
            }
            _ => {}
        }

        let response = tokio::select! {
            sent = request.send() => sent
                .map_err(|e| PartError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(PartError::Cancelled),
        };

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| PartError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.logger.info(format!("Response status: {}", status.as_u16()));

        let output = if status.is_success() { 1 } else { 2 };
        Ok(PartOutput::next(output)
            .with_variable("webhook.StatusCode", status.as_u16() as u64)
            .with_variable("webhook.Body", body_text))
    }
}

pub struct WebhookPartFactory;

impl PartFactory for WebhookPartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(WebhookPart::new()))
    }

    fn part_type(&self) -> &str {
        "http.webhook"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Call a webhook".to_string(),
            category: "http".to_string(),
            kind: PartKind::Output,
            properties: vec![
                PropertyDescriptor::required("url", PropertyKind::String),
                PropertyDescriptor::optional("method", PropertyKind::String, "POST"),
                PropertyDescriptor::optional("body", PropertyKind::Any, ""),
                PropertyDescriptor::optional(
                    "headers",
                    PropertyKind::Json,
                    Value::Object(HashMap::new()),
                ),
            ],
            outputs: vec![
                OutputDefinition::new(1, "Successful response"),
                OutputDefinition::new(2, "Non-success response"),
            ],
        }
    }
}
