//! In-memory broadcast surface.
//!
//! Holds a scripted set of guilds and records every call. Used by tests
//! across the workspace and by the runner's `--dry-run` mode, where writes are
//! logged instead of sent.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dx_core::display::Presence;
use tracing::info;

use crate::error::CastError;
use crate::{BroadcastSurface, Membership, SelfRecord};

/// One scripted guild.
#[derive(Debug, Clone)]
pub struct MemoryGuild {
    pub membership: Membership,
    pub nick: Option<String>,
    /// Own-record lookup fails for this guild.
    pub lookup_fails: bool,
    /// Nickname writes fail with this error.
    pub write_error: Option<CastError>,
    /// Delay before a nickname write completes.
    pub write_delay: Option<Duration>,
}

impl MemoryGuild {
    /// A guild where the process holds `permissions`.
    pub fn new(guild_id: u64, name: &str, permissions: u64) -> Self {
        Self {
            membership: Membership {
                guild_id,
                name: name.to_string(),
                owner: false,
                permissions,
            },
            nick: None,
            lookup_fails: false,
            write_error: None,
            write_delay: None,
        }
    }
}

/// A recorded surface call.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    ListMemberships,
    OwnRecord(u64),
    SetDisplayName(u64, String),
    SetStatus(String, Presence),
}

#[derive(Debug, Default)]
struct State {
    guilds: Vec<MemoryGuild>,
    listing_error: Option<CastError>,
    status_error: Option<CastError>,
    status: Option<(String, Presence)>,
    calls: Vec<SurfaceCall>,
}

/// Scripted, call-recording [`BroadcastSurface`].
#[derive(Debug, Default)]
pub struct MemorySurface {
    user_id: u64,
    state: Mutex<State>,
}

impl MemorySurface {
    pub fn new(user_id: u64, guilds: Vec<MemoryGuild>) -> Self {
        Self {
            user_id,
            state: Mutex::new(State {
                guilds,
                ..State::default()
            }),
        }
    }

    /// Make membership listing fail with `err`.
    pub fn fail_listing(&self, err: CastError) {
        self.lock().listing_error = Some(err);
    }

    /// Make status writes fail with `err`.
    pub fn fail_status(&self, err: CastError) {
        self.lock().status_error = Some(err);
    }

    /// Current nickname in `guild_id`.
    pub fn nick(&self, guild_id: u64) -> Option<String> {
        self.lock()
            .guilds
            .iter()
            .find(|g| g.membership.guild_id == guild_id)
            .and_then(|g| g.nick.clone())
    }

    /// Last status written.
    pub fn status(&self) -> Option<(String, Presence)> {
        self.lock().status.clone()
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BroadcastSurface for MemorySurface {
    async fn list_memberships(&self) -> Result<Vec<Membership>, CastError> {
        let mut st = self.lock();
        st.calls.push(SurfaceCall::ListMemberships);
        if let Some(err) = st.listing_error.clone() {
            return Err(err);
        }
        Ok(st.guilds.iter().map(|g| g.membership.clone()).collect())
    }

    async fn own_record(&self, guild_id: u64, user_id: u64) -> Result<SelfRecord, CastError> {
        let mut st = self.lock();
        st.calls.push(SurfaceCall::OwnRecord(guild_id));
        let guild = st
            .guilds
            .iter()
            .find(|g| g.membership.guild_id == guild_id)
            .ok_or_else(|| CastError::NotFound(format!("guild {guild_id}")))?;
        if guild.lookup_fails || user_id != self.user_id {
            return Err(CastError::NotFound(format!("member {user_id} in guild {guild_id}")));
        }
        Ok(SelfRecord {
            nick: guild.nick.clone(),
        })
    }

    async fn set_display_name(&self, guild_id: u64, name: &str) -> Result<(), CastError> {
        let delay = {
            let mut st = self.lock();
            st.calls.push(SurfaceCall::SetDisplayName(guild_id, name.to_string()));
            st.guilds
                .iter()
                .find(|g| g.membership.guild_id == guild_id)
                .and_then(|g| g.write_delay)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let mut st = self.lock();
        let guild = st
            .guilds
            .iter_mut()
            .find(|g| g.membership.guild_id == guild_id)
            .ok_or_else(|| CastError::NotFound(format!("guild {guild_id}")))?;
        if let Some(err) = guild.write_error.clone() {
            return Err(err);
        }
        guild.nick = Some(name.to_string());
        info!(guild_id, name, "[memory] nickname set");
        Ok(())
    }

    async fn set_status(&self, text: &str, presence: Presence) -> Result<(), CastError> {
        let mut st = self.lock();
        st.calls.push(SurfaceCall::SetStatus(text.to_string(), presence));
        if let Some(err) = st.status_error.clone() {
            return Err(err);
        }
        st.status = Some((text.to_string(), presence));
        info!(text, presence = presence.as_str(), "[memory] status set");
        Ok(())
    }
}
