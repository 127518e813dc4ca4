#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ghdevice::{Prompt, Prompter};
use tokio_util::sync::CancellationToken;
use wiremock::ResponseTemplate;

pub const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";

/// Form-encoded response body with the given status.
pub fn form_response(status: u16, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_raw(body.to_string(), FORM_MEDIA_TYPE)
}

/// Prompter that records how often it was invoked and the last prompt shown.
#[derive(Default)]
pub struct CountingPrompter {
    prompts: AtomicUsize,
    last: Mutex<Option<Prompt>>,
}

impl CountingPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Prompt> {
        self.last.lock().expect("prompt lock poisoned").clone()
    }
}

#[async_trait]
impl Prompter for CountingPrompter {
    async fn prompt(
        &self,
        prompt: Prompt,
        _cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().expect("prompt lock poisoned") = Some(prompt);
        Ok(())
    }
}

/// Prompter that always fails.
pub struct FailingPrompter;

#[async_trait]
impl Prompter for FailingPrompter {
    async fn prompt(
        &self,
        _prompt: Prompt,
        _cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("no display attached".into())
    }
}
