mod moderation_service;

pub use moderation_service::{
    ModerationOutcome, ModerationService, ModerationServiceDependencies, SubmitMessageCommand,
};
