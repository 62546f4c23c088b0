// Authorization checks over the identity supplied by the session layer.

use crate::error::{EngineError, EngineResult};
use crate::model::{League, Team, UserId};

/// The calling identity as handed over by the session collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<UserId>,
    pub is_admin: bool,
}

impl Caller {
    pub fn anonymous() -> Self {
        Caller::default()
    }

    pub fn user(id: impl Into<UserId>) -> Self {
        Caller {
            user_id: Some(id.into()),
            is_admin: false,
        }
    }

    pub fn admin(id: impl Into<UserId>) -> Self {
        Caller {
            user_id: Some(id.into()),
            is_admin: true,
        }
    }

    /// The caller's user id, or `Unauthorized` when there is no identity.
    pub fn require_user(&self) -> EngineResult<&str> {
        self.user_id.as_deref().ok_or(EngineError::Unauthorized)
    }

    pub fn require_admin(&self) -> EngineResult<()> {
        self.require_user()?;
        if self.is_admin {
            Ok(())
        } else {
            Err(EngineError::Forbidden("platform admin required".into()))
        }
    }

    pub fn is_commissioner(&self, league: &League) -> bool {
        self.is_admin || self.user_id.as_deref() == Some(league.commissioner_id.as_str())
    }

    pub fn require_commissioner(&self, league: &League) -> EngineResult<()> {
        self.require_user()?;
        if self.is_commissioner(league) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "only the commissioner of league {} may do this",
                league.id
            )))
        }
    }

    pub fn owns(&self, team: &Team) -> bool {
        match (&self.user_id, &team.owner_id) {
            (Some(user), Some(owner)) => user == owner,
            _ => false,
        }
    }

    /// Team owner or platform admin.
    pub fn require_team_owner(&self, team: &Team) -> EngineResult<()> {
        self.require_user()?;
        if self.is_admin || self.owns(team) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!("team {} is not yours", team.id)))
        }
    }

    /// Team owner, the league's commissioner, or platform admin.
    pub fn require_team_manager(&self, league: &League, team: &Team) -> EngineResult<()> {
        self.require_user()?;
        if self.owns(team) || self.is_commissioner(league) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "team {} is managed by someone else",
                team.id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DraftMode, DraftStatus};
    use crate::scoring::ScoringConfig;

    fn league() -> League {
        League {
            id: 1,
            season_id: 1,
            name: "Island".into(),
            commissioner_id: "jeff".into(),
            draft_mode: DraftMode::Snake,
            team_count: 2,
            budget: None,
            roster_size: 3,
            roster_remainder: 0,
            invite_code: "ABCDEF".into(),
            draft_status: DraftStatus::Pending,
            scoring: ScoringConfig::default(),
        }
    }

    fn team(owner: Option<&str>) -> Team {
        Team {
            id: 7,
            league_id: 1,
            slot: 2,
            name: "Team 2".into(),
            owner_id: owner.map(String::from),
            budget_remaining: None,
            draft_position: None,
        }
    }

    #[test]
    fn anonymous_caller_is_unauthorized() {
        let caller = Caller::anonymous();
        assert!(matches!(caller.require_user(), Err(EngineError::Unauthorized)));
        assert!(matches!(
            caller.require_commissioner(&league()),
            Err(EngineError::Unauthorized)
        ));
    }

    #[test]
    fn admin_passes_commissioner_and_owner_checks() {
        let admin = Caller::admin("root");
        assert!(admin.require_commissioner(&league()).is_ok());
        assert!(admin.require_team_owner(&team(Some("sandra"))).is_ok());
    }

    #[test]
    fn non_owner_is_forbidden() {
        let caller = Caller::user("parvati");
        assert!(matches!(
            caller.require_team_owner(&team(Some("sandra"))),
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            caller.require_team_owner(&team(None)),
            Err(EngineError::Forbidden(_))
        ));
    }

    #[test]
    fn commissioner_manages_any_team_but_does_not_own_it() {
        let commish = Caller::user("jeff");
        let t = team(Some("sandra"));
        assert!(commish.require_team_manager(&league(), &t).is_ok());
        assert!(commish.require_team_owner(&t).is_err());
    }
}
