use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::ConversationError;
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::response::ChatResponse;
use crate::models::role::Role;
use crate::models::tool::ToolCall;

/// The ordered message log of one chat session
///
/// The log always starts with the system prompt. Reads and appends may come from any
/// thread; readers get copies so a snapshot never observes later writes.
#[derive(Debug)]
pub struct Conversation {
    messages: RwLock<Vec<Message>>,
}

impl Conversation {
    pub fn new<S: Into<String>>(system_prompt: S) -> Result<Self, ConversationError> {
        let system_prompt = system_prompt.into();
        if system_prompt.is_empty() {
            return Err(ConversationError::EmptySystemPrompt);
        }

        Ok(Self {
            messages: RwLock::new(vec![Message::system(system_prompt)]),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Message>> {
        self.messages.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Message>> {
        self.messages.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user_message<S: Into<String>>(&self, content: S) -> Result<(), ConversationError> {
        let content = content.into();
        if content.is_empty() {
            return Err(ConversationError::EmptyUserMessage);
        }

        self.write().push(Message::user(content));
        Ok(())
    }

    /// Append the model's reply, keeping its tool calls verbatim
    pub fn add_assistant_response(&self, response: &ChatResponse) -> Result<(), ConversationError> {
        if response.text.is_empty() && !response.has_tool_calls() {
            return Err(ConversationError::EmptyAssistantResponse);
        }

        let message =
            Message::assistant(response.text.clone()).with_tool_calls(response.tool_calls.clone());
        self.write().push(message);
        Ok(())
    }

    /// Append the result of running a tool
    ///
    /// A result for an id that no assistant message issued is still appended, but logged;
    /// see [`Conversation::unmatched_tool_results`].
    pub fn add_tool_result<I, S>(&self, tool_call_id: I, result: S) -> Result<(), ConversationError>
    where
        I: Into<String>,
        S: Into<String>,
    {
        let tool_call_id = tool_call_id.into();
        if tool_call_id.is_empty() {
            return Err(ConversationError::EmptyToolCallId);
        }

        let mut messages = self.write();
        let issued = messages
            .iter()
            .flat_map(|message| &message.tool_calls)
            .any(|call| call.id == tool_call_id);
        if !issued {
            tracing::warn!(
                "tool result for {:?} does not answer any issued tool call",
                tool_call_id
            );
        }

        messages.push(Message::tool(tool_call_id, result));
        Ok(())
    }

    /// Independent copy of the message log
    pub fn snapshot(&self) -> Vec<Message> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Never true, the system prompt is always present
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn system_prompt(&self) -> String {
        self.read()
            .first()
            .map(|message| message.content.clone())
            .unwrap_or_default()
    }

    /// Request carrying a snapshot of the log
    pub fn request(&self) -> ChatRequest {
        ChatRequest::new(self.snapshot())
    }

    /// Tool calls issued by the assistant that have no result yet, oldest first
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let messages = self.read();
        let answered: HashSet<&str> = messages
            .iter()
            .filter(|message| message.role == Role::Tool)
            .filter_map(|message| message.tool_call_id.as_deref())
            .collect();

        messages
            .iter()
            .flat_map(|message| &message.tool_calls)
            .filter(|call| !answered.contains(call.id.as_str()))
            .cloned()
            .collect()
    }

    /// Ids of tool results that answer no issued tool call
    pub fn unmatched_tool_results(&self) -> Vec<String> {
        let messages = self.read();
        let issued: HashSet<&str> = messages
            .iter()
            .flat_map(|message| &message.tool_calls)
            .map(|call| call.id.as_str())
            .collect();

        messages
            .iter()
            .filter(|message| message.role == Role::Tool)
            .filter_map(|message| message.tool_call_id.as_deref())
            .filter(|id| !issued.contains(id))
            .map(str::to_string)
            .collect()
    }
}
