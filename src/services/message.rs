//! Message persistence for the socket path: membership rules, save, broadcast view.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::db::ChatStore;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::models::chat::{Message, NewMessage, Project, ProjectRole, User};
use crate::models::notification::Envelope;
use crate::models::request::SendMessageRequest;

/// A persisted message with the entities needed to deliver it.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub message: Message,
    pub project: Project,
    pub sender: User,
    pub receiver: Option<User>,
}

impl PostedMessage {
    /// Client-facing rendering sent with `receive_message` and in the sender's ack.
    pub fn view(&self) -> Value {
        let mut view = Map::new();
        view.insert("id".into(), json!(self.message.id));
        if let Some(content) = &self.message.content {
            view.insert("content".into(), json!(content));
        }
        if let Some(file_name) = &self.message.file_name {
            view.insert("file_name".into(), json!(file_name));
        }
        if let Some(file_base64) = &self.message.file_base64 {
            view.insert("file_base64".into(), json!(file_base64));
        }
        view.insert("sender".into(), json!(self.sender));
        if let Some(receiver) = &self.receiver {
            view.insert("receiver".into(), json!(receiver));
        }
        view.insert(
            "created_at".into(),
            json!(self.message.created_at.format("%m/%d/%Y, %H:%M").to_string()),
        );
        Value::Object(view)
    }

    /// Offline notice for this message.
    pub fn envelope(&self) -> Envelope {
        Envelope::new_message(
            &self.sender.username,
            &self.project.title,
            self.message.is_private(),
        )
    }
}

#[derive(Clone)]
pub struct MessageService {
    chat: Arc<dyn ChatStore>,
}

impl MessageService {
    pub fn new(chat: Arc<dyn ChatStore>) -> Self {
        Self { chat }
    }

    /// Check the sender's rights and persist. Nothing is written when a check fails.
    #[instrument(skip(self, req), fields(project_id = req.project_id))]
    pub async fn post(&self, sender_id: i64, req: &SendMessageRequest) -> AppResult<PostedMessage> {
        let project = self
            .chat
            .get_project(req.project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project {} does not exist", req.project_id)))?;

        let sender_role = project
            .role_of(sender_id)
            .ok_or_else(|| AppError::Forbidden("You must be a project's member.".to_string()))?;

        if let Some(receiver_id) = req.receiver_id {
            let mut errors = FieldErrors::new();
            if !project.is_member(receiver_id) {
                errors.insert("receiver", "A receiver must be a project's member.");
            }
            if sender_role == ProjectRole::Participant {
                errors.insert("sender", "A sender must be a project's owner or coach.");
            }
            errors.into_result(())?;
        }

        let sender = self
            .chat
            .get_user(sender_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {} does not exist", sender_id)))?;
        let receiver = match req.receiver_id {
            Some(id) => Some(
                self.chat
                    .get_user(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("user {} does not exist", id)))?,
            ),
            None => None,
        };

        let (file_name, file_base64) = match &req.attachment {
            Some(a) => (Some(a.file_name.clone()), Some(a.file_base64.clone())),
            None => (None, None),
        };
        let message = self
            .chat
            .save_message(NewMessage {
                project_id: project.id,
                sender_id,
                receiver_id: req.receiver_id,
                content: req.content.clone(),
                file_name,
                file_base64,
            })
            .await?;
        info!(message_id = message.id, sender_id, private = message.is_private(), "message saved");

        Ok(PostedMessage {
            message,
            project,
            sender,
            receiver,
        })
    }

    pub async fn project_members(&self, project_id: i64) -> AppResult<Vec<i64>> {
        self.chat.list_members_of_project(project_id).await
    }
}
