//! Echo Agent
//!
//! Streams the words of the submitted input back as fragments, one word per
//! `delay`, so a later submission can supersede it mid-turn.
//!
//! In agent mode each word is its own fragment; in plain mode the whole input
//! is a single fragment. Input starting with `fail:` fails the turn with the
//! remainder as the reason.
//!
//! Cancellation is checked before and after every pause, so a superseded
//! turn stops within one `delay`.

use crate::config::AgentConfig;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sdk::capability::{CancelCheck, FragmentStream, TurnAgent, TurnError, TurnRequest};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

const FAIL_PREFIX: &str = "fail:";

/// Agent that echoes its input word by word
#[derive(Debug, Clone)]
pub struct EchoAgent {
    delay: Duration,
}

impl EchoAgent {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(Duration::from_millis(config.echo_delay_ms))
    }

    fn plan(request: &TurnRequest) -> VecDeque<Result<String, TurnError>> {
        if let Some(reason) = request.content.strip_prefix(FAIL_PREFIX) {
            return VecDeque::from([Err(TurnError::Agent(reason.trim().to_string()))]);
        }

        if !request.agent_mode {
            return VecDeque::from([Ok(request.content.clone())]);
        }

        let words: Vec<&str> = request.content.split_whitespace().collect();
        let last = words.len().saturating_sub(1);
        words
            .into_iter()
            .enumerate()
            .map(|(i, word)| {
                if i == last {
                    Ok(word.to_string())
                } else {
                    Ok(format!("{} ", word))
                }
            })
            .collect()
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

#[async_trait]
impl TurnAgent for EchoAgent {
    fn name(&self) -> &str {
        "echo"
    }

    async fn start_turn(
        &self,
        request: TurnRequest,
        cancel: CancelCheck,
    ) -> Result<FragmentStream, TurnError> {
        let pending = Self::plan(&request);
        debug!(
            conversation_id = %request.conversation_id,
            turn = %request.turn,
            fragments = pending.len(),
            "echo turn planned"
        );

        let delay = self.delay;
        let stream = stream::unfold(
            (pending, cancel),
            move |(mut pending, cancel)| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if cancel.is_cancelled() {
                    return None;
                }
                let next = pending.pop_front()?;
                Some((next, (pending, cancel)))
            },
        );
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{ConversationId, TurnId};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn request(content: &str, agent_mode: bool) -> TurnRequest {
        TurnRequest {
            conversation_id: ConversationId::from("c1"),
            turn: TurnId(1),
            content: content.to_string(),
            agent_mode,
        }
    }

    async fn collect(stream: FragmentStream) -> Vec<Result<String, TurnError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_agent_mode_streams_words() {
        let agent = EchoAgent::new(Duration::ZERO);
        let stream = agent
            .start_turn(request("hello  big world", true), CancelCheck::never())
            .await
            .unwrap();

        let fragments: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(fragments, vec!["hello ", "big ", "world"]);
    }

    #[tokio::test]
    async fn test_plain_mode_is_single_fragment() {
        let agent = EchoAgent::new(Duration::ZERO);
        let stream = agent
            .start_turn(request("hello world", false), CancelCheck::never())
            .await
            .unwrap();

        let fragments = collect(stream).await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_fail_prefix_yields_agent_error() {
        let agent = EchoAgent::new(Duration::ZERO);
        let stream = agent
            .start_turn(request("fail: backend down", true), CancelCheck::never())
            .await
            .unwrap();

        let fragments = collect(stream).await;
        assert_eq!(fragments.len(), 1);
        match &fragments[0] {
            Err(TurnError::Agent(reason)) => assert_eq!(reason, "backend down"),
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stops_when_cancelled() {
        let flag = Arc::new(AtomicBool::new(false));
        let check = {
            let flag = Arc::clone(&flag);
            CancelCheck::new(move || flag.load(Ordering::SeqCst))
        };

        let agent = EchoAgent::new(Duration::from_millis(1));
        let mut stream = agent
            .start_turn(request("a b c d", true), check)
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "a ");
        flag.store(true, Ordering::SeqCst);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_input_produces_nothing() {
        let agent = EchoAgent::new(Duration::ZERO);
        let stream = agent
            .start_turn(request("   ", true), CancelCheck::never())
            .await
            .unwrap();
        assert!(collect(stream).await.is_empty());
    }
}
