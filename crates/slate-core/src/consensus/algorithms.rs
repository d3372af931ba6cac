//! The seven voting/arbitration rules.
//!
//! Each rule is a pure function over a session's votes and options. Ties
//! resolve to the earliest-seen candidate: aggregation preserves vote
//! arrival order, and only a strictly greater score displaces the leader.

use itertools::Itertools;
use serde_json::{json, Map, Value};

use super::session::{ConsensusAlgorithm, ConsensusOutcome, ConsensusSession, VoteOption};
use crate::CONSTITUTIONAL_HASH;

/// Run a session's configured algorithm.
#[must_use]
pub fn execute(session: &ConsensusSession) -> ConsensusOutcome {
    match session.algorithm {
        ConsensusAlgorithm::MajorityVote => majority_vote(session),
        ConsensusAlgorithm::WeightedVote => weighted_vote(session),
        ConsensusAlgorithm::RankedChoice => ranked_choice(session),
        ConsensusAlgorithm::ConsensusThreshold => consensus_threshold(session),
        ConsensusAlgorithm::HierarchicalOverride => hierarchical_override(session),
        ConsensusAlgorithm::ConstitutionalPriority => constitutional_priority(session),
        ConsensusAlgorithm::ExpertMediation => expert_mediation(session),
    }
}

/// Aggregate `(key, amount)` pairs, preserving first-seen key order.
fn tally<'a>(pairs: impl Iterator<Item = (&'a str, f64)>) -> Vec<(String, f64)> {
    let mut totals: Vec<(String, f64)> = Vec::new();
    for (key, amount) in pairs {
        match totals.iter_mut().find(|(k, _)| k == key) {
            Some((_, total)) => *total += amount,
            None => totals.push((key.to_owned(), amount)),
        }
    }
    totals
}

/// Leader under strictly-greater comparison; earliest entry wins ties.
fn leader(totals: &[(String, f64)]) -> Option<(&str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (key, score) in totals {
        if best.map_or(true, |(_, top)| *score > top) {
            best = Some((key, *score));
        }
    }
    best
}

fn distribution(totals: &[(String, f64)]) -> Value {
    let map: Map<String, Value> = totals
        .iter()
        .map(|(key, score)| (key.clone(), json!(score)))
        .collect();
    Value::Object(map)
}

fn outcome(
    algorithm: ConsensusAlgorithm,
    success: bool,
    winning_option: Option<VoteOption>,
    confidence_score: f64,
    details: Value,
) -> ConsensusOutcome {
    ConsensusOutcome {
        success,
        algorithm,
        winning_option,
        confidence_score,
        reason: None,
        next_steps: Vec::new(),
        details,
        escalation: None,
        constitutional_hash: CONSTITUTIONAL_HASH.to_owned(),
    }
}

fn no_votes(algorithm: ConsensusAlgorithm) -> ConsensusOutcome {
    ConsensusOutcome::failure(
        algorithm,
        "No votes cast",
        vec!["escalate".into(), "add_participants".into(), "extend_deadline".into()],
    )
}

/// Strict majority: the leading option needs more than half of all votes.
fn majority_vote(session: &ConsensusSession) -> ConsensusOutcome {
    let algorithm = ConsensusAlgorithm::MajorityVote;
    if session.votes.is_empty() {
        return no_votes(algorithm);
    }

    let counts = tally(session.votes.iter().map(|v| (v.option_id.as_str(), 1.0)));
    let Some((winner_id, winning_votes)) = leader(&counts) else {
        return no_votes(algorithm);
    };
    let total_votes = session.votes.len() as f64;
    let has_majority = winning_votes * 2.0 > total_votes;

    let mut result = outcome(
        algorithm,
        has_majority,
        session.option(winner_id).cloned(),
        winning_votes / total_votes,
        json!({
            "vote_distribution": distribution(&counts),
            "winning_votes": winning_votes,
            "total_votes": total_votes,
            "majority_achieved": has_majority,
        }),
    );
    if !has_majority {
        result.reason = Some("No majority achieved".into());
        result.next_steps =
            vec!["escalate".into(), "add_participants".into(), "extend_deadline".into()];
    }
    result
}

/// Weighted vote: score per option is the sum of `weight * confidence`;
/// the winner must hold at least the configured share of the total.
fn weighted_vote(session: &ConsensusSession) -> ConsensusOutcome {
    let algorithm = ConsensusAlgorithm::WeightedVote;
    if session.votes.is_empty() {
        return no_votes(algorithm);
    }

    let scores = tally(
        session
            .votes
            .iter()
            .map(|v| (v.option_id.as_str(), v.weight * v.confidence)),
    );
    let total_weight: f64 = scores.iter().map(|(_, s)| s).sum();
    let Some((winner_id, winning_weight)) = leader(&scores) else {
        return no_votes(algorithm);
    };

    let threshold = session.config.weighted_threshold;
    let share = if total_weight > 0.0 {
        winning_weight / total_weight
    } else {
        0.0
    };
    let success = share >= threshold;

    let mut result = outcome(
        algorithm,
        success,
        session.option(winner_id).cloned(),
        share,
        json!({
            "weighted_distribution": distribution(&scores),
            "winning_weight": winning_weight,
            "total_weight": total_weight,
            "weighted_percentage": share,
            "threshold": threshold,
        }),
    );
    if !success {
        result.reason = Some(format!("Weighted threshold not met: {share:.2} < {threshold}"));
        result.next_steps =
            vec!["escalate".into(), "adjust_weights".into(), "extend_deadline".into()];
    }
    result
}

/// Ranked choice by confidence-weighted score; confidence derives from the
/// gap between winner and runner-up.
fn ranked_choice(session: &ConsensusSession) -> ConsensusOutcome {
    let algorithm = ConsensusAlgorithm::RankedChoice;
    if session.votes.is_empty() {
        return no_votes(algorithm);
    }

    // Every option scores, even with zero votes, in declared order.
    let mut scores: Vec<(String, f64)> = session
        .options
        .iter()
        .map(|opt| (opt.id.clone(), 0.0))
        .collect();
    for vote in &session.votes {
        if let Some((_, score)) = scores.iter_mut().find(|(id, _)| *id == vote.option_id) {
            *score += vote.confidence * vote.weight;
        }
    }
    if scores.is_empty() {
        return ConsensusOutcome::failure(
            algorithm,
            "No valid options to rank",
            vec!["gather_more_input".into(), "expert_review".into(), "escalate".into()],
        );
    }

    let ranked: Vec<(String, f64)> = scores
        .iter()
        .cloned()
        .sorted_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
        .collect();
    let (winner_id, winning_score) = ranked[0].clone();

    let (confidence, score_gap) = if ranked.len() > 1 {
        let runner_up = ranked[1].1;
        let gap = winning_score - runner_up;
        let confidence = if winning_score > 0.0 {
            (gap / winning_score).min(1.0)
        } else {
            0.0
        };
        (confidence, gap)
    } else {
        (1.0, winning_score)
    };

    let min_confidence = session.config.min_confidence;
    let success = confidence >= min_confidence;

    let mut result = outcome(
        algorithm,
        success,
        session.option(&winner_id).cloned(),
        confidence,
        json!({
            "option_rankings": ranked,
            "min_confidence_threshold": min_confidence,
            "score_gap": score_gap,
        }),
    );
    if !success {
        result.reason =
            Some(format!("Insufficient confidence: {confidence:.2} < {min_confidence}"));
        result.next_steps =
            vec!["gather_more_input".into(), "expert_review".into(), "escalate".into()];
    }
    result
}

/// Consensus threshold: an option needs confidence-weighted support from
/// the configured share of all participants.
fn consensus_threshold(session: &ConsensusSession) -> ConsensusOutcome {
    let algorithm = ConsensusAlgorithm::ConsensusThreshold;
    if session.votes.is_empty() {
        return no_votes(algorithm);
    }

    let threshold = session.config.consensus_threshold;
    let total_participants = session.participants.len() as f64;

    let mut support: Vec<(String, f64, usize)> = Vec::new();
    for option in &session.options {
        let votes_for: Vec<_> = session
            .votes
            .iter()
            .filter(|v| v.option_id == option.id)
            .collect();
        let weighted = if total_participants > 0.0 {
            votes_for.iter().map(|v| v.confidence).sum::<f64>() / total_participants
        } else {
            0.0
        };
        support.push((option.id.clone(), weighted, votes_for.len()));
    }

    let candidates: Vec<&(String, f64, usize)> =
        support.iter().filter(|(_, weighted, _)| *weighted >= threshold).collect();

    let pick_leader = |pool: &[&(String, f64, usize)]| -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for (id, weighted, _) in pool {
            if best.as_ref().map_or(true, |(_, top)| *weighted > *top) {
                best = Some((id.clone(), *weighted));
            }
        }
        best
    };

    let (success, winner) = if candidates.is_empty() {
        let everyone: Vec<&(String, f64, usize)> = support.iter().collect();
        (false, pick_leader(&everyone))
    } else {
        (true, pick_leader(&candidates))
    };
    let Some((winner_id, winner_support)) = winner else {
        return no_votes(algorithm);
    };

    let option_support: Map<String, Value> = support
        .iter()
        .map(|(id, weighted, count)| {
            (
                id.clone(),
                json!({
                    "vote_count": count,
                    "support_percentage": if total_participants > 0.0 {
                        *count as f64 / total_participants
                    } else {
                        0.0
                    },
                    "weighted_support": weighted,
                    "meets_threshold": *weighted >= threshold,
                }),
            )
        })
        .collect();

    let mut result = outcome(
        algorithm,
        success,
        session.option(&winner_id).cloned(),
        winner_support,
        json!({
            "option_support": Value::Object(option_support),
            "consensus_threshold": threshold,
            "achieved_consensus": success,
        }),
    );
    if !success {
        result.reason = Some(format!(
            "Consensus threshold not met: {winner_support:.2} < {threshold}"
        ));
        result.next_steps = vec![
            "facilitate_discussion".into(),
            "modify_options".into(),
            "lower_threshold".into(),
        ];
    }
    result
}

/// Hierarchical override: the highest-authority vote wins outright above
/// the override threshold; otherwise fall back to majority vote.
fn hierarchical_override(session: &ConsensusSession) -> ConsensusOutcome {
    let algorithm = ConsensusAlgorithm::HierarchicalOverride;
    if session.votes.is_empty() {
        return no_votes(algorithm);
    }

    // Strictly-greater assignment: the earliest vote wins authority ties,
    // and a session where no vote rises above zero authority has no valid
    // authority vote at all.
    let mut authority_vote = None;
    let mut highest_level = 0.0_f64;
    for vote in &session.votes {
        let level = vote.voter_type.authority();
        if level > highest_level {
            highest_level = level;
            authority_vote = Some(vote);
        }
    }
    let Some(authority_vote) = authority_vote else {
        return ConsensusOutcome::failure(
            algorithm,
            "No valid authority votes found",
            Vec::new(),
        );
    };

    let override_threshold = session.config.override_threshold;
    let can_override = highest_level >= override_threshold;

    let fallback = if !can_override && session.votes.len() > 1 {
        Some(majority_vote(session))
    } else {
        None
    };
    let success = can_override || fallback.as_ref().is_some_and(|f| f.success);

    let mut result = outcome(
        algorithm,
        success,
        session.option(&authority_vote.option_id).cloned(),
        authority_vote.confidence,
        json!({
            "override_applied": can_override,
            "highest_authority_level": highest_level,
            "override_threshold": override_threshold,
            "authority_vote": authority_vote,
            "fallback_consensus": fallback,
        }),
    );
    if !success {
        result.reason = Some("Insufficient authority level and no regular consensus".into());
        result.next_steps =
            vec!["escalate_to_higher_authority".into(), "seek_expert_input".into()];
    }
    result
}

/// Constitutional priority: options ranked by constitutional score, blended
/// 70/30 with voting support when votes exist. Succeeds on options alone.
fn constitutional_priority(session: &ConsensusSession) -> ConsensusOutcome {
    let algorithm = ConsensusAlgorithm::ConstitutionalPriority;
    if session.options.is_empty() {
        return ConsensusOutcome::failure(
            algorithm,
            "No options available",
            vec!["escalate".into()],
        );
    }

    let mut ranking: Vec<&VoteOption> = session.options.iter().collect();
    ranking.sort_by(|a, b| {
        b.constitutional_score
            .partial_cmp(&a.constitutional_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let (winner, final_score) = if session.votes.is_empty() {
        let top = ranking[0];
        (top, top.constitutional_score)
    } else {
        let mut best: Option<(&VoteOption, f64)> = None;
        for option in &session.options {
            let vote_support: f64 = session
                .votes
                .iter()
                .filter(|v| v.option_id == option.id)
                .map(|v| v.confidence * v.weight)
                .sum();
            let combined = option.constitutional_score.mul_add(0.7, vote_support * 0.3);
            if best.map_or(true, |(_, top)| combined > top) {
                best = Some((option, combined));
            }
        }
        match best {
            Some(found) => found,
            None => (ranking[0], ranking[0].constitutional_score),
        }
    };

    let min_score = session.config.min_constitutional_score;
    let success = winner.constitutional_score >= min_score;
    let winning_constitutional_score = winner.constitutional_score;

    let mut result = outcome(
        algorithm,
        success,
        Some(winner.clone()),
        final_score,
        json!({
            "constitutional_ranking": ranking
                .iter()
                .map(|opt| json!({
                    "option_id": opt.id,
                    "option_name": opt.name,
                    "constitutional_score": opt.constitutional_score,
                }))
                .collect::<Vec<_>>(),
            "min_constitutional_threshold": min_score,
            "winning_constitutional_score": winning_constitutional_score,
        }),
    );
    if !success {
        result.reason = Some(format!(
            "Constitutional threshold not met: {winning_constitutional_score:.2} < {min_score}"
        ));
        result.next_steps = vec![
            "improve_constitutional_compliance".into(),
            "seek_expert_review".into(),
            "escalate".into(),
        ];
    }
    result
}

/// Expert mediation: only human and human-expert votes count; the first
/// option reaching the agreement threshold wins.
fn expert_mediation(session: &ConsensusSession) -> ConsensusOutcome {
    let algorithm = ConsensusAlgorithm::ExpertMediation;
    if session.votes.is_empty() {
        return no_votes(algorithm);
    }

    let expert_votes: Vec<_> = session
        .votes
        .iter()
        .filter(|v| v.voter_type.is_expert())
        .collect();
    if expert_votes.is_empty() {
        return ConsensusOutcome::failure(
            algorithm,
            "No expert input available for mediation",
            vec!["request_expert_input".into(), "escalate_for_human_review".into()],
        );
    }

    let total_experts = expert_votes.len() as f64;
    let threshold = session.config.expert_consensus_threshold;
    let counts = tally(expert_votes.iter().map(|v| (v.option_id.as_str(), 1.0)));

    let mut consensus_achieved = false;
    let mut winner: Option<(&str, f64)> = None;
    for (option_id, count) in &counts {
        let agreement = count / total_experts;
        if agreement >= threshold {
            consensus_achieved = true;
            winner = Some((option_id, agreement));
            break;
        }
    }
    if winner.is_none() {
        winner = leader(&counts).map(|(id, count)| (id, count / total_experts));
    }
    let Some((winner_id, agreement)) = winner else {
        return no_votes(algorithm);
    };

    let agent_support = tally(
        session
            .votes
            .iter()
            .filter(|v| !v.voter_type.is_expert())
            .map(|v| (v.option_id.as_str(), v.confidence * v.weight)),
    );

    let mut result = outcome(
        algorithm,
        consensus_achieved,
        session.option(winner_id).cloned(),
        agreement,
        json!({
            "expert_consensus_achieved": consensus_achieved,
            "expert_agreement_level": agreement,
            "expert_threshold": threshold,
            "total_experts": total_experts,
            "expert_vote_distribution": distribution(&counts),
            "agent_support": distribution(&agent_support),
        }),
    );
    if !consensus_achieved {
        result.reason =
            Some(format!("Expert consensus not achieved: {agreement:.2} < {threshold}"));
        result.next_steps = vec![
            "facilitate_expert_discussion".into(),
            "seek_additional_experts".into(),
            "escalate".into(),
        ];
    }
    result
}
