//! Reward issuance boundary.
//!
//! Converting a completed mission into credited experience, credits, and
//! resources is an external concern; the mission engine only guarantees it
//! is invoked exactly once per completion. An issuance failure is logged
//! and surfaced but never rolls back the completion state.

use tracing::info;

use crate::types::mission::{MissionRecord, ResourceGrant, RewardDescriptor};

/// What was actually credited for a completed mission
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RewardSummary {
    pub experience: u64,
    pub credits: u64,
    pub resources: Vec<ResourceGrant>,
}

/// External collaborator that issues the reward for a completed mission.
pub trait RewardIssuer: Send + Sync {
    /// Called exactly once per mission completion.
    fn award(
        &self,
        mission: &MissionRecord,
        reward: &RewardDescriptor,
    ) -> Result<RewardSummary, String>;
}

/// Default issuer: credits the descriptor verbatim.
#[derive(Debug, Clone, Default)]
pub struct CreditingIssuer;

impl RewardIssuer for CreditingIssuer {
    fn award(
        &self,
        mission: &MissionRecord,
        reward: &RewardDescriptor,
    ) -> Result<RewardSummary, String> {
        info!(
            mission = %mission.id,
            experience = reward.experience,
            credits = reward.credits,
            "Issuing mission reward"
        );
        Ok(RewardSummary {
            experience: reward.experience,
            credits: reward.credits,
            resources: reward.resources.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::mission::{
        MissionId, MissionKind, MissionStatus, UnlockRequirements,
    };

    #[test]
    fn test_crediting_issuer_passes_descriptor_through() {
        let mission = MissionRecord {
            id: MissionId::from("m1"),
            title: "M1".to_string(),
            kind: MissionKind::Mining,
            status: MissionStatus::Completed,
            progress: 10,
            max_progress: 10,
            reward: RewardDescriptor::default(),
            requirements: UnlockRequirements::default(),
        };
        let reward = RewardDescriptor {
            experience: 100,
            credits: 50,
            resources: vec![ResourceGrant {
                item: "iron_ingot".to_string(),
                quantity: 2,
            }],
        };
        let summary = CreditingIssuer.award(&mission, &reward).unwrap();
        assert_eq!(summary.experience, 100);
        assert_eq!(summary.credits, 50);
        assert_eq!(summary.resources.len(), 1);
    }
}
