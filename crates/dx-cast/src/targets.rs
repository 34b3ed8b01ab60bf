//! Target enumeration.
//!
//! Lists the guilds the process belongs to and resolves, per guild, its own
//! member record and whether it may change its own nickname. Enumeration never
//! fails: a failed listing yields no targets, a failed own-record lookup drops
//! that guild for the current cycle.

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::{BroadcastSurface, Membership, Target};

/// Bypasses every permission check.
pub const ADMINISTRATOR: u64 = 1 << 3;
/// Allows changing one's own nickname.
pub const CHANGE_NICKNAME: u64 = 1 << 26;

/// Whether the process may change its own nickname in `membership`.
pub fn can_change_nickname(membership: &Membership) -> bool {
    membership.owner || membership.permissions & (ADMINISTRATOR | CHANGE_NICKNAME) != 0
}

/// Resolve this cycle's targets.
///
/// `restrict_to` limits the result to a single guild. Own-record lookups run
/// concurrently.
pub async fn list_targets<S>(surface: &S, self_id: u64, restrict_to: Option<u64>) -> Vec<Target>
where
    S: BroadcastSurface + ?Sized,
{
    let memberships = match surface.list_memberships().await {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "membership listing failed, no targets this cycle");
            return Vec::new();
        }
    };

    let memberships: Vec<Membership> = memberships
        .into_iter()
        .filter(|m| restrict_to.is_none_or(|id| id == m.guild_id))
        .collect();

    if let Some(id) = restrict_to {
        if memberships.is_empty() {
            warn!(guild_id = id, "configured guild is not among the bot's memberships");
        }
    }

    let lookups = memberships.into_iter().map(|m| async move {
        match surface.own_record(m.guild_id, self_id).await {
            Ok(record) => Some(Target {
                guild_id: m.guild_id,
                can_change_nickname: can_change_nickname(&m),
                name: m.name,
                current_nick: record.nick,
            }),
            Err(e) => {
                debug!(guild_id = m.guild_id, guild = %m.name, error = %e, "own record lookup failed, skipping guild");
                None
            }
        }
    });

    join_all(lookups).await.into_iter().flatten().collect()
}
