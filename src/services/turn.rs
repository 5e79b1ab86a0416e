use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::generation::{GenerateError, GenerateRequest, GenerationBoundary, StreamEvent};
use crate::services::document;
use crate::services::history::{HistoryManager, TurnAttachment, TurnReceipt, TurnRecord};

/// Everything one turn needs: the boundary request plus the local-only
/// pieces (credential, display text, raw attachment bytes to persist).
pub struct TurnParams {
    pub request: GenerateRequest,
    pub access_password: Option<String>,
    /// Typed text shown in the chat bubble; the request text may also
    /// carry pasted file contents.
    pub display_text: String,
    pub images: Vec<TurnAttachment>,
    pub files: Vec<TurnAttachment>,
}

pub struct TurnOutcome {
    pub receipt: TurnReceipt,
    pub xml: String,
}

/// Drive one generation turn end to end: stream the response, extract and
/// validate the document, then persist the user/assistant pair. Content
/// deltas are forwarded to `on_delta` as they arrive. Cancellation drops
/// the stream and the accumulator; partial output is never persisted.
pub async fn run_turn<F>(
    boundary: Arc<dyn GenerationBoundary>,
    history: &HistoryManager,
    params: TurnParams,
    cancel_token: CancellationToken,
    mut on_delta: F,
) -> Result<TurnOutcome, GenerateError>
where
    F: FnMut(&str) + Send,
{
    let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamEvent>(64);

    let request = params.request.clone();
    let password = params.access_password.clone();
    let _stream_handle = tokio::spawn(async move {
        if let Err(e) = boundary
            .stream_generate(&request, password.as_deref(), tx.clone())
            .await
        {
            let _ = tx.send(StreamEvent::Error(e)).await;
        }
    });

    let mut accumulated = String::new();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                return Err(GenerateError::Cancelled);
            }
            event = rx.recv() => {
                match event {
                    Some(StreamEvent::Content(delta)) => {
                        accumulated.push_str(&delta);
                        on_delta(&delta);
                    }
                    Some(StreamEvent::Done) => break,
                    Some(StreamEvent::Error(e)) => return Err(e),
                    None => {
                        return Err(GenerateError::Network(
                            "Stream ended unexpectedly".to_string(),
                        ));
                    }
                }
            }
        }
    }

    let xml = document::extract(&accumulated)?;

    let user_input = if params.display_text.is_empty() {
        params.request.user_input.text.clone()
    } else {
        params.display_text.clone()
    };

    let receipt = history
        .add_history(TurnRecord {
            conversation_id: Some(params.request.conversation_id.clone()),
            chart_type: params.request.chart_type.clone(),
            user_input,
            generated_xml: xml.clone(),
            config: params.request.config.clone(),
            images: params.images,
            files: params.files,
        })
        .await
        .map_err(|e| GenerateError::RequestFailed(format!("Failed to persist turn: {}", e)))?;

    Ok(TurnOutcome { receipt, xml })
}
