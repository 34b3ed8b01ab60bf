//! Production broadcast surface: REST for guild data and nicknames, the
//! gateway for presence.

use async_trait::async_trait;
use dx_core::display::Presence;

use crate::error::CastError;
use crate::gateway::GatewayHandle;
use crate::rest::DiscordRest;
use crate::{BroadcastSurface, Membership, SelfRecord};

pub struct DiscordSurface {
    rest: DiscordRest,
    gateway: GatewayHandle,
}

impl DiscordSurface {
    pub fn new(rest: DiscordRest, gateway: GatewayHandle) -> Self {
        Self { rest, gateway }
    }
}

#[async_trait]
impl BroadcastSurface for DiscordSurface {
    async fn list_memberships(&self) -> Result<Vec<Membership>, CastError> {
        self.rest.current_user_guilds().await
    }

    async fn own_record(&self, guild_id: u64, user_id: u64) -> Result<SelfRecord, CastError> {
        self.rest.guild_member(guild_id, user_id).await
    }

    async fn set_display_name(&self, guild_id: u64, name: &str) -> Result<(), CastError> {
        self.rest.modify_own_nick(guild_id, name).await
    }

    async fn set_status(&self, text: &str, presence: Presence) -> Result<(), CastError> {
        self.gateway.update_presence(text, presence).await
    }
}
