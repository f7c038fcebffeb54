//! Group membership and master-key distribution.
//!
//! The admin mints a master key and sends it to every member over their
//! pairwise ratchet session. A joining member receives the current key
//! together with the generation every existing sender has reached, so its
//! receiving chains start where the group is now. A departure mints a fresh
//! key at the next epoch for everyone who remains, so the departed member
//! cannot derive future message keys.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use courier_core::{ConversationId, Environment, UserId};
use courier_crypto::{CryptoError, GroupSession, SenderKeyDistribution};
use tracing::{debug, info};

use crate::{
    error::DeliveryError,
    service::Courier,
    session_store::{ConversationState, CryptoContext, GroupContext, MemberKeys},
    storage::MessageStore,
};

impl<E: Environment, S: MessageStore> Courier<E, S> {
    /// Create a group administered by `admin`. The admin is always a member.
    pub async fn create_group(
        &self,
        group_id: u128,
        admin: UserId,
        members: impl IntoIterator<Item = UserId>,
    ) -> Result<ConversationId, DeliveryError> {
        let id = ConversationId::group(group_id);
        if self.sessions.get(id).is_some() {
            return Err(DeliveryError::ConversationExists(id));
        }

        let mut members: BTreeSet<UserId> = members.into_iter().collect();
        members.insert(admin);
        if let Some(&unknown) = members.iter().find(|&&member| self.devices.identity(member).is_none()) {
            return Err(DeliveryError::UnknownUser(unknown));
        }

        let distribution = SenderKeyDistribution::new(group_id, 0, self.env.random_key());
        let mut sessions = HashMap::with_capacity(members.len());
        for &member in &members {
            let session = self.distribute(admin, member, &distribution).await?;
            sessions.insert(member, MemberKeys::new(session));
        }

        let size = members.len();
        let context = GroupContext { admin, members, distribution, sessions };
        self.sessions
            .insert_new(id, ConversationState::group(context))
            .ok_or(DeliveryError::ConversationExists(id))?;

        info!(conversation = %id, admin, members = size, "group created");
        Ok(id)
    }

    /// Add `member` to a group. Only the admin may do this. The new member
    /// receives the current master key and each sender's current chain
    /// position; nobody else is re-keyed.
    pub async fn add_member(
        &self,
        group_id: u128,
        by: UserId,
        member: UserId,
    ) -> Result<(), DeliveryError> {
        let id = ConversationId::group(group_id);
        let lock = self.sessions.get(id).ok_or(DeliveryError::UnknownConversation(id))?;
        let mut state = lock.lock().await;
        let CryptoContext::Group(group) = &mut state.context else {
            return Err(DeliveryError::UnknownConversation(id));
        };
        if group.admin != by {
            return Err(DeliveryError::NotAdmin { user: by, conversation: id });
        }
        if group.members.contains(&member) {
            debug!(conversation = %id, member, "already a member");
            return Ok(());
        }
        if self.devices.identity(member).is_none() {
            return Err(DeliveryError::UnknownUser(member));
        }

        let chain_starts: BTreeMap<UserId, u32> = group
            .sessions
            .iter()
            .map(|(&sender, keys)| (sender, keys.current.sending_generation()))
            .collect();
        let join = group.distribution.clone().with_chain_starts(chain_starts);
        let session = self.distribute(group.admin, member, &join).await?;
        group.members.insert(member);
        group.sessions.insert(member, MemberKeys::new(session));

        info!(conversation = %id, member, epoch = group.distribution.key_epoch, "member added");
        Ok(())
    }

    /// Remove `member` from a group and re-key everyone who remains.
    ///
    /// The admin may remove anyone else; any other member may only remove
    /// themselves. Messages already in flight under the previous key stay
    /// readable for the remaining members.
    pub async fn remove_member(
        &self,
        group_id: u128,
        by: UserId,
        member: UserId,
    ) -> Result<(), DeliveryError> {
        let id = ConversationId::group(group_id);
        let lock = self.sessions.get(id).ok_or(DeliveryError::UnknownConversation(id))?;
        let mut state = lock.lock().await;
        let CryptoContext::Group(group) = &mut state.context else {
            return Err(DeliveryError::UnknownConversation(id));
        };
        if by != group.admin && by != member {
            return Err(DeliveryError::NotAdmin { user: by, conversation: id });
        }
        if member == group.admin {
            return Err(DeliveryError::AdminCannotLeave(id));
        }
        if !group.members.contains(&member) {
            return Err(DeliveryError::NotAParticipant { user: member, conversation: id });
        }

        let distribution = SenderKeyDistribution::new(
            group_id,
            group.distribution.key_epoch + 1,
            self.env.random_key(),
        );

        // Distribute to everyone before touching state, so a failure leaves
        // the group on its old key.
        let mut rotated = Vec::with_capacity(group.members.len());
        for &remaining in group.members.iter().filter(|&&m| m != member) {
            rotated.push((remaining, self.distribute(group.admin, remaining, &distribution).await?));
        }

        group.members.remove(&member);
        group.sessions.remove(&member);
        for (remaining, session) in rotated {
            if let Some(keys) = group.sessions.get_mut(&remaining) {
                keys.rotate(session);
            }
        }
        let epoch = distribution.key_epoch;
        group.distribution = distribution;

        info!(conversation = %id, member, epoch, "member removed, group re-keyed");
        Ok(())
    }

    /// Send `distribution` from `admin` to `member` over their pairwise
    /// session and install it on the member's side.
    async fn distribute(
        &self,
        admin: UserId,
        member: UserId,
        distribution: &SenderKeyDistribution,
    ) -> Result<GroupSession, DeliveryError> {
        let install = |member: UserId, distribution: &SenderKeyDistribution| {
            GroupSession::with_limits(
                member,
                distribution,
                self.config.skipped_key_capacity,
                self.config.max_skip,
            )
            .map_err(|err| DeliveryError::from(CryptoError::from(err)))
        };
        if member == admin {
            return install(admin, distribution);
        }

        let pair = self.open_direct(admin, member).await?;
        let lock = self.sessions.get(pair).ok_or(DeliveryError::UnknownConversation(pair))?;
        let mut state = lock.lock().await;
        let CryptoContext::Direct(direct) = &mut state.context else {
            return Err(DeliveryError::UnknownConversation(pair));
        };

        let outbound =
            direct.sessions.get_mut(&admin).ok_or(DeliveryError::UnknownConversation(pair))?;
        let sealed = outbound
            .encrypt(&distribution.to_bytes(), self.env.random_key())
            .map_err(CryptoError::from)?;

        let inbound =
            direct.sessions.get_mut(&member).ok_or(DeliveryError::UnknownConversation(pair))?;
        let bytes = inbound.decrypt(&sealed).map_err(CryptoError::from)?;
        let received = SenderKeyDistribution::from_bytes(&bytes).map_err(CryptoError::from)?;

        install(member, &received)
    }
}
