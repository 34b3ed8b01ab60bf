//! # dx-cast
//!
//! Broadcast side of the dominance engine: everything that talks to the chat
//! platform (Discord).
//!
//! ## Architecture
//!
//! ```text
//! GatewaySession ──► GatewayStatus (watch)  ──► scheduler Idle → Running
//!               ◄── presence updates (mpsc) ◄── DiscordSurface::set_status
//! DiscordRest    ◄── list / lookup / nickname ◄── DiscordSurface
//!
//! targets::list_targets    (surface → Vec<Target>, never fails)
//! distributor::fan_out     (surface × targets × payload → CycleReport)
//! ```
//!
//! The enumerator and distributor only see the [`BroadcastSurface`] trait, so
//! they run unchanged against [`memory::MemorySurface`] in tests and dry runs.

pub mod distributor;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod rest;
pub mod surface;
pub mod targets;

use async_trait::async_trait;
use dx_core::display::Presence;

pub use error::CastError;
pub use surface::DiscordSurface;

/// One guild the process is a member of, as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub guild_id: u64,
    pub name: String,
    /// The process's user owns the guild.
    pub owner: bool,
    /// Guild-level permission bits of the process's user.
    pub permissions: u64,
}

/// The process's own member record inside one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfRecord {
    /// Current nickname, if one is set.
    pub nick: Option<String>,
}

/// One broadcast destination for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub guild_id: u64,
    pub name: String,
    /// The process may change its own nickname here.
    pub can_change_nickname: bool,
    /// Nickname already set; an identical write is skipped.
    pub current_nick: Option<String>,
}

/// Trait implemented by all broadcast surfaces.
///
/// All methods take `&self` so per-target calls can run concurrently.
#[async_trait]
pub trait BroadcastSurface: Send + Sync {
    /// List every guild the process belongs to.
    async fn list_memberships(&self) -> Result<Vec<Membership>, CastError>;

    /// Look up the process's own member record in `guild_id`.
    async fn own_record(&self, guild_id: u64, user_id: u64) -> Result<SelfRecord, CastError>;

    /// Set the process's own nickname in `guild_id`.
    async fn set_display_name(&self, guild_id: u64, name: &str) -> Result<(), CastError>;

    /// Set the process-wide status text and presence.
    async fn set_status(&self, text: &str, presence: Presence) -> Result<(), CastError>;
}
