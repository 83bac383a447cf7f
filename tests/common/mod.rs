//! Common test utilities

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hintbatch::credentials::{Credential, CredentialPool};
use hintbatch::dispatch::{DispatchConfig, RetryDispatcher};
use hintbatch::llm::{GeminiClient, LlmConfig};
use serde_json::{json, Value};

/// Path the Gemini client posts to for the default model
pub const GENERATE_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

/// Input table with four data rows (spreadsheet rows 2-5)
#[allow(dead_code)]
pub const SAMPLE_TABLE: &str = "id,problem,code,answer\n\
1,Add two numbers,print(1+2),3\n\
2,Say hello,\"print(\"\"hello\"\")\",hello\n\
3,Loop to ten,\"for i in range(10):\n    print(i)\",0..9\n\
4,Reverse a string,\"s[::-1]\",olleh\n";

/// Successful generateContent body
pub fn gemini_reply(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

/// Retry timings short enough for tests against a real mock server
pub fn fast_dispatch() -> DispatchConfig {
    DispatchConfig {
        rate_limit_base_ms: 1,
        transient_max_attempts: 3,
        transient_min_delay_ms: 1,
        transient_max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

/// Client configuration pointing at a mock server
pub fn llm_config(uri: &str) -> LlmConfig {
    LlmConfig {
        endpoint: uri.to_string(),
        timeout_secs: 5,
        ..Default::default()
    }
}

/// Pool over the given literal keys
pub fn pool(keys: &[&str]) -> CredentialPool {
    CredentialPool::new(keys.iter().map(|k| Credential::new(*k))).unwrap()
}

/// Dispatcher backed by a real Gemini client
#[allow(dead_code)]
pub fn dispatcher(uri: &str, keys: &[&str]) -> RetryDispatcher {
    let client = GeminiClient::new(llm_config(uri)).unwrap();
    RetryDispatcher::new(Arc::new(client), pool(keys), fast_dispatch().policy())
}

/// Write `content` to `dir/name` and return the path
#[allow(dead_code)]
pub fn write_input(dir: &Path, name: &str, content: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Only file in `dir`
#[allow(dead_code)]
pub fn single_file(dir: &Path) -> PathBuf {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1, "expected exactly one file in {}", dir.display());
    entries.remove(0)
}
