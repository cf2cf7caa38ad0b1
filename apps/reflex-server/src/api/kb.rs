use std::collections::HashMap;
use std::io::Cursor;
use std::str::FromStr;

use axum::extract::{Multipart, State};
use axum::response::Response;
use reflex_kb::{KbChatParams, KbError};
use reflex_protocol::BaseResponse;
use serde_json::Value;
use tracing::info;

use crate::app_state::KbDefaults;
use crate::{responses, AppState};

#[derive(Debug, Default)]
struct CsvForm {
    file: Option<Vec<u8>>,
    fields: HashMap<String, String>,
}

impl CsvForm {
    fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str, default: T) -> Result<T, String> {
        match self.text(name) {
            Some(raw) => raw
                .parse()
                .map_err(|_| format!("invalid {name}: {raw}")),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str) -> Result<bool, String> {
        match self.text(name).map(str::to_ascii_lowercase).as_deref() {
            None | Some("false") | Some("0") => Ok(false),
            Some("true") | Some("1") => Ok(true),
            Some(other) => Err(format!("invalid {name}: {other}")),
        }
    }

    fn params(&self, defaults: &KbDefaults) -> Result<KbChatParams, String> {
        let knowledge_base_name = self
            .text("knowledge_base_name")
            .ok_or("knowledge_base_name is required")?
            .to_string();
        let model_name = self
            .text("model_name")
            .map(str::to_string)
            .or_else(|| defaults.model.clone())
            .ok_or("model_name is required")?;
        let max_tokens = match self.text("max_tokens") {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .map_err(|_| format!("invalid max_tokens: {raw}"))?,
            ),
            None => None,
        };
        Ok(KbChatParams {
            knowledge_base_name,
            top_k: self.parse("top_k", defaults.top_k)?,
            score_threshold: self.parse("score_threshold", defaults.score_threshold)?,
            model_name,
            temperature: self.parse("temperature", defaults.temperature)?,
            max_tokens,
            prompt_name: self
                .text("prompt_name")
                .map(str::to_string)
                .unwrap_or_else(|| defaults.prompt_name.clone()),
        })
    }
}

async fn read_form(multipart: &mut Multipart) -> Result<CsvForm, String> {
    let mut form = CsvForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let bytes = field.bytes().await.map_err(|e| e.to_string())?;
            form.file = Some(bytes.to_vec());
        } else {
            let value = field.text().await.map_err(|e| e.to_string())?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

/// `POST /knowledge_base/chat_with_csv`
pub async fn chat_with_csv(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let form = match read_form(&mut multipart).await {
        Ok(form) => form,
        Err(err) => return responses::bad_request(format!("invalid multipart body: {err}")),
    };
    let params = match form.params(state.kb_defaults()) {
        Ok(params) => params,
        Err(err) => return responses::bad_request(err),
    };
    let debug_flag = match form.flag("debug") {
        Ok(debug) => debug,
        Err(err) => return responses::bad_request(err),
    };
    let Some(file) = form.file else {
        return responses::bad_request("file is required");
    };
    info!(
        target: "reflex::kb",
        knowledge_base = %params.knowledge_base_name,
        bytes = file.len(),
        debug = debug_flag,
        "chat_with_csv"
    );

    match state
        .kb()
        .chat_with_csv(Cursor::new(file), &params, debug_flag)
        .await
    {
        Ok(results) => responses::json_ok(BaseResponse::success(results)),
        Err(KbError::NotFound(name)) => responses::json_ok(BaseResponse::error(
            404,
            format!("knowledge base not found: {name}"),
            vec![Value::Null],
        )),
        Err(err) => responses::kb_error(&err),
    }
}
