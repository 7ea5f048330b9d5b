//! Per-mode drivers: debate rounds, ensemble vote, parallel answers.

use super::rounds::{initial_user_content, positions};
use super::{Checkpoint, OrchestratorError, TurnOrchestrator};
use crate::ports::llm_gateway::LlmGateway;
use crate::ports::turn_events::TurnEvent;
use crate::use_cases::stream_reader::read_stream;
use roundtable_domain::{
    ConvergenceCheck, DebateMetadata, EnsembleResult, EnsembleStatus, Message, PromptTemplate,
    TerminationReason, VoteAnalysis, parse_convergence_response, parse_vote_analysis,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl<G: LlmGateway + ?Sized + 'static> TurnOrchestrator<G> {
    /// Rounds until convergence or the round limit, then synthesis.
    pub(super) async fn run_debate(
        &self,
        checkpoint: Checkpoint,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let max_rounds = self.max_rounds()?;
        let Checkpoint {
            mut round_index,
            mut rerun,
        } = checkpoint;

        let metadata = loop {
            self.run_round(round_index, &rerun, history, cancel).await?;
            let round_number = round_index as u32 + 1;

            if round_number >= max_rounds {
                break DebateMetadata::terminated(
                    round_number,
                    TerminationReason::MaxRoundsReached,
                );
            }
            if round_number >= 2 {
                let check = self.check_convergence(round_index, cancel).await?;
                if check.has_converged() {
                    info!("Debate converged after round {}", round_number);
                    break DebateMetadata::terminated(round_number, TerminationReason::Converged);
                }
            }

            round_index += 1;
            self.push_round(round_index)?;
            rerun = (0..self.stream_count(round_index)?).collect();
        };

        self.set_metadata(metadata.clone())?;
        self.persist().await;

        let messages = self.with_turn(|turn| {
            let final_positions = turn.final_round().map(positions).unwrap_or_default();
            let mut messages = vec![Message::system(PromptTemplate::synthesis_system())];
            messages.extend_from_slice(history);
            messages.push(Message::user(PromptTemplate::debate_synthesis_prompt(
                &turn.user_prompt,
                metadata.total_rounds,
                metadata.converged,
                &final_positions,
            )));
            messages
        })?;
        self.run_synthesis(messages, cancel).await
    }

    /// Independent answers, judge vote, weighted synthesis.
    pub(super) async fn run_ensemble(
        &self,
        checkpoint: Checkpoint,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        self.run_round(0, &checkpoint.rerun, history, cancel).await?;
        let vote = self.run_vote(cancel).await?;

        self.set_metadata(DebateMetadata::terminated(1, TerminationReason::EnsembleVote))?;
        self.persist().await;

        let messages = self.with_turn(|turn| {
            let answers = turn.rounds.first().map(positions).unwrap_or_default();
            let mut messages = vec![Message::system(PromptTemplate::synthesis_system())];
            messages.extend_from_slice(history);
            messages.push(Message::user(PromptTemplate::ensemble_synthesis_prompt(
                &turn.user_prompt,
                &answers,
                &vote,
            )));
            messages
        })?;
        self.run_synthesis(messages, cancel).await
    }

    /// Independent answers only.
    pub(super) async fn run_parallel(
        &self,
        checkpoint: Checkpoint,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        self.run_round(0, &checkpoint.rerun, history, cancel).await?;
        self.set_metadata(DebateMetadata::terminated(1, TerminationReason::ParallelOnly))?;
        Ok(())
    }

    /// Ask the judge whether the positions of `round_index` agree.
    ///
    /// A settled verdict already on the round is reused. A failed judge call
    /// or an unreadable reply counts as "not converged".
    async fn check_convergence(
        &self,
        round_index: usize,
        cancel: &CancellationToken,
    ) -> Result<ConvergenceCheck, OrchestratorError> {
        let existing = self.with_turn(|t| {
            t.rounds[round_index]
                .convergence_check
                .clone()
                .filter(|c| !c.is_pending())
        })?;
        if let Some(check) = existing {
            debug!("Reusing convergence verdict for round {}", round_index + 1);
            return Ok(check);
        }

        let (question, round_number, current) = self.with_turn(|t| {
            let round = &mut t.rounds[round_index];
            round.convergence_check = Some(ConvergenceCheck::pending());
            (t.user_prompt.clone(), round.round_number, positions(round))
        })?;

        let judge = self.config.models().judge.clone();
        let messages = vec![
            Message::system(PromptTemplate::convergence_system()),
            Message::user(PromptTemplate::convergence_prompt(
                &question,
                round_number,
                &current,
            )),
        ];
        let stall = self.config.params().effective_stall_timeout();
        let result = read_stream(
            self.gateway.as_ref(),
            self.request(&judge, messages),
            cancel,
            stall,
            |_| {},
        )
        .await;

        let check = match result {
            Ok(outcome) => parse_convergence_response(&outcome.content),
            Err(failure) if failure.is_cancelled() => {
                self.with_turn(|t| t.rounds[round_index].convergence_check = None)?;
                return Err(OrchestratorError::Cancelled);
            }
            Err(failure) => {
                warn!("Convergence check with {} failed: {}", judge, failure.error);
                ConvergenceCheck::not_converged(
                    format!("Convergence check failed: {}", failure.error),
                    failure.partial,
                )
            }
        };

        info!(
            "Round {} convergence: {} ({})",
            round_number,
            check.has_converged(),
            check.reason
        );
        self.with_turn(|t| t.rounds[round_index].convergence_check = Some(check.clone()))?;
        self.emit(TurnEvent::ConvergenceChecked {
            round_index,
            check: check.clone(),
        });
        self.persist().await;
        Ok(check)
    }

    /// Judge the independent answers. A settled result is reused.
    async fn run_vote(
        &self,
        cancel: &CancellationToken,
    ) -> Result<EnsembleResult, OrchestratorError> {
        let existing = self.with_turn(|t| {
            t.ensemble_result
                .clone()
                .filter(|r| r.status != EnsembleStatus::Analyzing)
        })?;
        if let Some(result) = existing {
            return Ok(result);
        }

        let judge = self.config.models().judge.clone();
        let (question, answers) = self.with_turn(|t| {
            t.ensemble_result = Some(EnsembleResult::analyzing());
            let answers = t.rounds.first().map(positions).unwrap_or_default();
            (initial_user_content(t), answers)
        })?;
        self.emit(TurnEvent::EnsembleAnalyzing {
            judge: judge.clone(),
        });

        let answered: Vec<String> = answers.iter().map(|(model, _)| model.clone()).collect();
        let messages = vec![
            Message::system(PromptTemplate::vote_system()),
            Message::user(PromptTemplate::vote_prompt(&question, &answers)),
        ];
        let stall = self.config.params().effective_stall_timeout();
        let result = read_stream(
            self.gateway.as_ref(),
            self.request(&judge, messages),
            cancel,
            stall,
            |_| {},
        )
        .await;

        let vote = match result {
            Ok(outcome) => {
                let analysis = parse_vote_analysis(&outcome.content, &answered)
                    .unwrap_or_else(|| {
                        warn!("Could not parse vote from {}; using neutral weights", judge);
                        VoteAnalysis::neutral()
                    });
                EnsembleResult::from_analysis(EnsembleStatus::Complete, analysis, outcome.content)
                    .with_timing(outcome.usage, outcome.duration_ms)
            }
            Err(failure) if failure.is_cancelled() => {
                self.with_turn(|t| t.ensemble_result = None)?;
                return Err(OrchestratorError::Cancelled);
            }
            Err(failure) => {
                warn!("Ensemble judge {} failed: {}", judge, failure.error);
                EnsembleResult::failed(failure.error.to_string())
                    .with_timing(None, failure.duration_ms)
            }
        };

        info!("Ensemble vote: {}% confidence", vote.confidence);
        self.with_turn(|t| t.ensemble_result = Some(vote.clone()))?;
        self.emit(TurnEvent::EnsembleAnalyzed {
            result: vote.clone(),
        });
        self.persist().await;
        Ok(vote)
    }
}
