//! The weft message fabric.
//!
//! A set of logical agents exchange typed messages over managed channels.
//! Every message passes the safety filter pipeline before the router sees
//! it; the router enqueues for delivery with bounded retry; a health
//! monitor recomputes channel scores from recent traffic. The gateway
//! crate bridges external connections into this core.

pub mod authority;
pub mod channel;
pub mod error;
pub mod fabric;
pub mod filter;
pub mod message;
pub mod monitor;
pub mod registry;
pub mod router;
pub mod translation;

pub use {
    authority::{AllowAll, Authority, AuthorityDecision},
    channel::{ChannelId, ChannelProtocol, ChannelStatus, MAX_BANDWIDTH},
    error::FabricError,
    fabric::{Fabric, SubmitOutcome},
    filter::{
        Classification, Classifier, FilterAction, FilterPipeline, FilterVerdict,
        KeywordClassifier, RiskLevel, SafetyRule,
    },
    message::{Message, MessageId},
    registry::ChannelRegistry,
    router::{RouteOutcome, Router},
    translation::TranslationCache,
};
