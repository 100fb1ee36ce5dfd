//! 标准输入行协议
//!
//! 普通行：`<user_id>\t<room_id>\t<content>`
//! 管理命令：`/block <user>`、`/unblock <user>`、`/reset <user>`、`/stats <user>`

use application::SubmitMessageCommand;
use domain::{DomainError, RoomId, UserId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    Block,
    Unblock,
    Reset,
    Stats,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::Block => "block",
            AdminAction::Unblock => "unblock",
            AdminAction::Reset => "reset",
            AdminAction::Stats => "stats",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Input {
    Submit(SubmitMessageCommand),
    Admin(AdminAction, UserId),
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("expected <user_id>\\t<room_id>\\t<content>")]
    MissingField,
    #[error("unknown command: /{0}")]
    UnknownCommand(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// 解析一行输入，空行返回 `None`
pub fn parse_line(line: &str) -> Result<Option<Input>, InputError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    if let Some(command) = line.strip_prefix('/') {
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let user_id = UserId::parse(parts.next().ok_or(InputError::MissingField)?)?;
        let action = match name {
            "block" => AdminAction::Block,
            "unblock" => AdminAction::Unblock,
            "reset" => AdminAction::Reset,
            "stats" => AdminAction::Stats,
            other => return Err(InputError::UnknownCommand(other.to_owned())),
        };
        return Ok(Some(Input::Admin(action, user_id)));
    }

    let mut fields = line.splitn(3, '\t');
    let user_id = fields.next().ok_or(InputError::MissingField)?;
    let room_id = fields.next().ok_or(InputError::MissingField)?;
    let content = fields.next().ok_or(InputError::MissingField)?;

    Ok(Some(Input::Submit(SubmitMessageCommand {
        user_id: UserId::parse(user_id)?,
        room_id: RoomId::parse(room_id)?,
        content: content.to_owned(),
    })))
}
