//! Save-time campaign validation. Everything checked here is a hard error:
//! definitions that pass are safe for the engine to execute without
//! re-checking node references or payload shapes at tick time.

use crate::model::{Campaign, NodeRef, PostAction};
use dripline_conditions::Condition;
use dripline_core::{AutomationError, AutomationResult};
use std::collections::HashSet;
use url::Url;

pub fn validate(campaign: &Campaign) -> AutomationResult<()> {
    if campaign.triggers.is_empty() {
        return Err(invalid("campaign has no triggers"));
    }
    if campaign.flow.steps.is_empty() {
        return Err(invalid("campaign flow has no steps"));
    }

    let mut node_ids: HashSet<&str> = HashSet::new();
    for step in &campaign.flow.steps {
        if step.id.is_empty() {
            return Err(invalid("step id must not be empty"));
        }
        if !node_ids.insert(&step.id) {
            return Err(invalid(format!("duplicate node id: {}", step.id)));
        }
    }
    for branch in &campaign.flow.branches {
        if branch.id.is_empty() {
            return Err(invalid("branch id must not be empty"));
        }
        if !node_ids.insert(&branch.id) {
            return Err(invalid(format!("duplicate node id: {}", branch.id)));
        }
    }

    for step in &campaign.flow.steps {
        if let Some(next) = &step.next {
            check_ref(campaign, next, &step.id)?;
        }
        for action in &step.post_actions {
            if let PostAction::CallWebhook { url } = action {
                Url::parse(url).map_err(|e| {
                    invalid(format!("step {}: invalid webhook url {url}: {e}", step.id))
                })?;
            }
        }
        check_variants(step)?;
    }
    for branch in &campaign.flow.branches {
        check_ref(campaign, &branch.true_path, &branch.id)?;
        if let Some(false_path) = &branch.false_path {
            check_ref(campaign, false_path, &branch.id)?;
        }
    }
    check_branch_cycles(campaign)?;

    for conditions in condition_lists(campaign) {
        for condition in conditions {
            if let Condition::TimeWindow(window) = condition {
                if !window.timezone_is_valid() {
                    return Err(invalid(format!("unknown timezone: {}", window.timezone)));
                }
            }
        }
    }
    if let Some(window) = &campaign.settings.sending_window {
        if !window.timezone_is_valid() {
            return Err(invalid(format!(
                "sending window has unknown timezone: {}",
                window.timezone
            )));
        }
    }

    Ok(())
}

fn check_ref(campaign: &Campaign, node: &NodeRef, from: &str) -> AutomationResult<()> {
    let ok = match node {
        NodeRef::Step { id } => campaign.step(id).is_some(),
        NodeRef::Branch { id } => campaign.branch(id).is_some(),
        NodeRef::End => true,
    };
    if ok {
        Ok(())
    } else {
        Err(invalid(format!("{from} references unknown node {node:?}")))
    }
}

/// Branch arms may chain to other branches; those chains run inside a
/// single tick, so a branch-only cycle would never terminate. Cycles broken
/// by a step are legal (the step reschedules).
fn check_branch_cycles(campaign: &Campaign) -> AutomationResult<()> {
    for start in &campaign.flow.branches {
        let mut path: HashSet<&str> = HashSet::new();
        walk_branch(campaign, &start.id, &mut path)?;
    }
    Ok(())
}

fn walk_branch<'a>(
    campaign: &'a Campaign,
    branch_id: &'a str,
    path: &mut HashSet<&'a str>,
) -> AutomationResult<()> {
    if !path.insert(branch_id) {
        return Err(invalid(format!("branch cycle detected through {branch_id}")));
    }
    if let Some(branch) = campaign.branch(branch_id) {
        for target in [Some(&branch.true_path), branch.false_path.as_ref()]
            .into_iter()
            .flatten()
        {
            if let NodeRef::Branch { id } = target {
                walk_branch(campaign, id, path)?;
            }
        }
    }
    path.remove(branch_id);
    Ok(())
}

fn check_variants(step: &crate::model::Step) -> AutomationResult<()> {
    for variant in &step.template.subject_variants {
        if variant.weight <= 0.0 || !variant.weight.is_finite() {
            return Err(invalid(format!(
                "step {}: subject variant weight must be positive",
                step.id
            )));
        }
    }
    Ok(())
}

fn condition_lists(campaign: &Campaign) -> impl Iterator<Item = &[Condition]> {
    campaign
        .triggers
        .iter()
        .map(|t| t.conditions.as_slice())
        .chain(campaign.flow.steps.iter().map(|s| s.conditions.as_slice()))
        .chain(campaign.goals.iter().map(|g| g.conditions.as_slice()))
}

fn invalid(msg: impl Into<String>) -> AutomationError {
    AutomationError::Validation(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Branch, BranchCondition, CampaignSettings, CampaignTrigger, EmailTemplate,
        EngagementMetric, Flow, Step, SubjectVariant,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn base_step(id: &str) -> Step {
        Step {
            id: id.into(),
            delay_minutes: 0,
            template: EmailTemplate {
                subject: "s".into(),
                html_body: "b".into(),
                subject_variants: vec![],
            },
            conditions: vec![],
            post_actions: vec![],
            next: None,
        }
    }

    fn base_campaign(steps: Vec<Step>, branches: Vec<Branch>) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            account_id: "acct-1".into(),
            name: "c".into(),
            description: String::new(),
            triggers: vec![CampaignTrigger {
                event_type: "contact_created".into(),
                conditions: vec![],
                delay_minutes: 0,
                priority: 0,
            }],
            flow: Flow { steps, branches },
            exit_conditions: vec![],
            goals: vec![],
            settings: CampaignSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_valid_campaign_passes() {
        let campaign = base_campaign(vec![base_step("a"), base_step("b")], vec![]);
        assert!(validate(&campaign).is_ok());
    }

    #[test]
    fn test_empty_flow_rejected() {
        let campaign = base_campaign(vec![], vec![]);
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let campaign = base_campaign(vec![base_step("a"), base_step("a")], vec![]);
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_dangling_ref_rejected() {
        let mut step = base_step("a");
        step.next = Some(NodeRef::step("ghost"));
        let campaign = base_campaign(vec![step], vec![]);
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_branch_cycle_rejected() {
        let branches = vec![
            Branch {
                id: "x".into(),
                condition: BranchCondition::EmailEngagement {
                    metric: EngagementMetric::Opened,
                },
                true_path: NodeRef::branch("y"),
                false_path: None,
                wait_minutes: 0,
            },
            Branch {
                id: "y".into(),
                condition: BranchCondition::EmailEngagement {
                    metric: EngagementMetric::Clicked,
                },
                true_path: NodeRef::branch("x"),
                false_path: Some(NodeRef::step("a")),
                wait_minutes: 0,
            },
        ];
        let campaign = base_campaign(vec![base_step("a")], branches);
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_branch_chain_through_step_allowed() {
        let branches = vec![Branch {
            id: "x".into(),
            condition: BranchCondition::EmailEngagement {
                metric: EngagementMetric::Opened,
            },
            // Loops back to a step, which delays a tick: legal
            true_path: NodeRef::step("a"),
            false_path: Some(NodeRef::End),
            wait_minutes: 30,
        }];
        let mut step = base_step("a");
        step.next = Some(NodeRef::branch("x"));
        let campaign = base_campaign(vec![step], branches);
        assert!(validate(&campaign).is_ok());
    }

    #[test]
    fn test_bad_webhook_url_rejected() {
        let mut step = base_step("a");
        step.post_actions = vec![PostAction::CallWebhook {
            url: "not a url".into(),
        }];
        let campaign = base_campaign(vec![step], vec![]);
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_zero_variant_weight_rejected() {
        let mut step = base_step("a");
        step.template.subject_variants = vec![SubjectVariant {
            subject: "alt".into(),
            weight: 0.0,
        }];
        let campaign = base_campaign(vec![step], vec![]);
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_bad_sending_window_timezone_rejected() {
        use dripline_conditions::window::hhmm;
        let mut campaign = base_campaign(vec![base_step("a")], vec![]);
        campaign.settings.sending_window = Some(dripline_conditions::TimeWindow {
            start: hhmm::parse("09:00").unwrap(),
            end: hhmm::parse("17:00").unwrap(),
            days_of_week: vec![],
            timezone: "Atlantis/Capital".into(),
        });
        assert!(validate(&campaign).is_err());
    }
}
