// Agent hierarchy: who exists, at what level, and who may address whom.

pub mod registry;
pub mod validator;

pub use registry::{Agent, AgentRegistry};
pub use validator::CommunicationValidator;

pub const CMO: &str = "cmo";
pub const MARKETING_STRATEGIST: &str = "marketing_strategist";
pub const CAMPAIGN_MANAGER: &str = "campaign_manager";
pub const COMPETITIVE_ANALYST: &str = "competitive_analyst";
pub const CONTENT_WRITER: &str = "content_writer";
pub const DATA_ANALYST: &str = "data_analyst";
pub const SEO_SPECIALIST: &str = "seo_specialist";
pub const SOCIAL_MEDIA_MANAGER: &str = "social_media_manager";
