use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{ChatDraft, ChatMessage, Principal, RequestId, RequestStatus, ServiceRequest};
use super::error::DispatchError;
use super::fanout::{publish_quietly, ChannelKey, DispatchEvent, NotificationPublisher};
use super::repository::{ChatAppend, DispatchStore};

pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Position in a request's chat log. `after` is the last sequence number already seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryCursor {
    #[serde(default)]
    pub after: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatPage {
    pub messages: Vec<ChatMessage>,
    /// Cursor for the next page, present when this page came back full.
    pub next_after: Option<u64>,
}

/// Per-request conversation between the requester and the assigned provider.
///
/// Notified providers who never won the request have no access. History of a cancelled
/// request stays readable, but no new messages are taken.
pub struct ChatOverlay<S, N> {
    store: Arc<S>,
    publisher: Arc<N>,
    page_size: usize,
}

impl<S, N> ChatOverlay<S, N>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(store: Arc<S>, publisher: Arc<N>, page_size: usize) -> Self {
        Self {
            store,
            publisher,
            page_size: page_size.max(1),
        }
    }

    pub fn post_message(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        text: &str,
    ) -> Result<ChatMessage, DispatchError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DispatchError::Validation("message must not be empty".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(DispatchError::Validation(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let request = self.authorized(principal, request_id)?;
        if request.status == RequestStatus::Cancelled {
            return Err(cancelled_chat());
        }

        let draft = ChatDraft {
            sender: principal.clone(),
            sender_name: self.display_name(principal)?,
            text: text.to_string(),
            sent_at: Utc::now(),
        };
        let message = match self.store.append(request_id, draft)? {
            ChatAppend::Appended(message) => message,
            ChatAppend::RequestCancelled => return Err(cancelled_chat()),
        };

        publish_quietly(
            self.publisher.as_ref(),
            ChannelKey::Request(request_id.clone()),
            DispatchEvent::ReceiveMessage {
                request_id: request_id.clone(),
                message: message.clone(),
            },
        );

        debug!(request = %request_id, sequence = message.sequence, sender = %principal, "chat message appended");
        Ok(message)
    }

    pub fn history(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        cursor: HistoryCursor,
    ) -> Result<ChatPage, DispatchError> {
        self.authorized(principal, request_id)?;

        let limit = cursor.limit.unwrap_or(self.page_size);
        if limit == 0 {
            return Err(DispatchError::Validation("limit must be at least 1".to_string()));
        }
        let limit = limit.min(self.page_size);

        let messages = self.store.messages(request_id, cursor.after, limit)?;
        let next_after = if messages.len() == limit {
            messages.last().map(|message| message.sequence)
        } else {
            None
        };
        Ok(ChatPage {
            messages,
            next_after,
        })
    }

    fn authorized(
        &self,
        principal: &Principal,
        request_id: &RequestId,
    ) -> Result<ServiceRequest, DispatchError> {
        let request = self
            .store
            .fetch(request_id)?
            .ok_or(DispatchError::NotFound("request"))?;
        if !request.is_party(principal) {
            return Err(DispatchError::Forbidden("access denied"));
        }
        Ok(request)
    }

    fn display_name(&self, principal: &Principal) -> Result<String, DispatchError> {
        let name = match principal {
            Principal::Requester(id) => self.store.requester(id)?.map(|requester| requester.name),
            Principal::Provider(id) => self.store.provider(id)?.map(|provider| provider.name),
        };
        Ok(name.unwrap_or_else(|| principal.id().to_string()))
    }
}

fn cancelled_chat() -> DispatchError {
    DispatchError::Validation("request was cancelled; chat is read-only".to_string())
}
