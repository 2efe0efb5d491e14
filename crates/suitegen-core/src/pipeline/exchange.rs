//! One cached model round trip.
//!
//! The cache is consulted before the backend: a hit is replayed into the chat
//! without any network traffic, a miss is sent, extracted and registered.
//! Every exchange starts from a fresh conversation (keeping only the system
//! prompt), so a stored artifact depends on nothing but its key.

use std::time::Duration;

use tracing::{debug, info};

use crate::errors::{SuitegenError, SuitegenResult};
use crate::llm::accessor::ModelAccessor;
use crate::models::{CacheKey, ChatRole};
use crate::pipeline::envelope::ResponseEnvelope;
use crate::store::cache::CacheAccessor;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetched {
    pub key: CacheKey,
    pub artifact: String,
    pub from_cache: bool,
}

/// What an exchange needs besides the accessor itself.
#[derive(Clone, Copy)]
pub struct ExchangeContext<'a> {
    pub cache: &'a CacheAccessor,
    pub envelope: &'a ResponseEnvelope,
    pub project: &'a str,
}

pub(crate) fn model_name(model: &ModelAccessor) -> SuitegenResult<String> {
    model
        .model()
        .map(|m| m.name().to_string())
        .ok_or_else(|| SuitegenError::NotReady("no model selected".into()))
}

/// Clear the chat, restoring its system prompt if it had one.
pub fn reset_conversation(model: &mut ModelAccessor) -> SuitegenResult<()> {
    let system = model
        .chat()
        .and_then(|chat| chat.messages().first())
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.clone());
    model.clear_chat()?;
    if let Some(text) = system {
        model.set_system_prompt(&text)?;
    }
    Ok(())
}

/// Obtain the artifact for `(prompt, attempt)`, from storage when possible.
///
/// A reply the envelope cannot parse fails with `WrongResponseFormat` and is
/// not stored. Losing a registration race to another worker is not an
/// error: the winner's artifact is returned instead.
pub fn fetch_artifact(
    model: &mut ModelAccessor,
    ctx: ExchangeContext<'_>,
    prompt: &str,
    attempt: u32,
    timeout: Duration,
) -> SuitegenResult<Fetched> {
    let key = CacheKey::new(ctx.project, prompt, model_name(model)?, attempt);
    reset_conversation(model)?;

    if ctx.cache.exists_key(&key)? {
        let artifact = ctx.cache.get_key(&key)?;
        model.record_exchange(prompt, &artifact)?;
        debug!("cache hit for {} attempt {attempt}", ctx.project);
        return Ok(Fetched {
            key,
            artifact,
            from_cache: true,
        });
    }

    let reply = model.prompt(prompt, timeout)?;
    let artifact = ctx.envelope.extract(&reply)?;
    match ctx.cache.register_key(&key, &artifact) {
        Ok(()) => {
            info!("stored artifact for {} attempt {attempt}", ctx.project);
            Ok(Fetched {
                key,
                artifact,
                from_cache: false,
            })
        }
        Err(SuitegenError::AlreadyExists(_)) => {
            debug!("lost registration race for {} attempt {attempt}", ctx.project);
            let artifact = ctx.cache.get_key(&key)?;
            Ok(Fetched {
                key,
                artifact,
                from_cache: true,
            })
        }
        Err(e) => Err(e),
    }
}
