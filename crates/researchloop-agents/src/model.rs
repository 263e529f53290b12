use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use researchloop_core::{
    Answer, Clarification, Critique, FilteredItem, Observation, ProposedAction, ReasonRequest,
    Reference, ResearchModel,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::AgentError;
use crate::prompt;
use crate::provider::{ChatMessage, ChatRequest, LlmProvider};

#[derive(Debug, Deserialize)]
struct ClarificationReply {
    #[serde(default)]
    needed: bool,
    #[serde(default)]
    question: String,
}

#[derive(Debug, Deserialize)]
struct FilterReply {
    #[serde(default)]
    items: Vec<FilteredItem>,
}

#[derive(Debug, Deserialize)]
struct ReferenceReply {
    index: i64,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnswerReply {
    #[serde(alias = "cited_text")]
    cited_answer: String,
    #[serde(default)]
    references: Vec<ReferenceReply>,
}

#[derive(Debug, Deserialize)]
struct CritiqueReply {
    is_good: bool,
    #[serde(default)]
    critique: String,
    #[serde(default)]
    missing_info: String,
}

/// [`ResearchModel`] backed by a chat-completion provider in JSON mode.
pub struct LlmResearchModel {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: Option<f32>,
}

impl LlmResearchModel {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: Some(0.0),
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    async fn complete<T: DeserializeOwned>(
        &self,
        function: &'static str,
        user_prompt: String,
    ) -> Result<T, AgentError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(prompt::SYSTEM_PROMPT),
                ChatMessage::user(user_prompt),
            ],
            temperature: self.temperature,
            json_mode: true,
        };
        let response = self.provider.chat(&request).await?;
        debug!(
            function,
            provider = self.provider.name(),
            chars = response.content.len(),
            "model replied"
        );
        parse_reply(function, &response.content)
    }
}

/// Parse a JSON reply, tolerating a surrounding markdown code fence.
pub(crate) fn parse_reply<T: DeserializeOwned>(
    function: &'static str,
    content: &str,
) -> Result<T, AgentError> {
    let trimmed = content.trim();
    let json = if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    };

    serde_json::from_str(json).map_err(|err| AgentError::InvalidResponse {
        function,
        message: err.to_string(),
        content: content.to_string(),
    })
}

#[async_trait]
impl ResearchModel for LlmResearchModel {
    #[instrument(name = "llm.clarify", skip_all)]
    async fn clarify(&self, question: &str) -> Result<Clarification> {
        let reply: ClarificationReply = self.complete("clarify", prompt::clarify(question)).await?;
        Ok(Clarification {
            needed: reply.needed,
            question: reply.question.trim().to_string(),
        })
    }

    #[instrument(name = "llm.reason_act", skip_all, fields(history = request.history.len()))]
    async fn reason_act(&self, request: ReasonRequest<'_>) -> Result<ProposedAction> {
        Ok(self.complete("reason_act", prompt::reason_act(&request)).await?)
    }

    #[instrument(name = "llm.filter_results", skip_all)]
    async fn filter_results(
        &self,
        question: &str,
        observations: &[Observation],
    ) -> Result<Vec<FilteredItem>> {
        let reply: FilterReply = self
            .complete("filter_results", prompt::filter_results(question, observations))
            .await?;
        Ok(reply
            .items
            .into_iter()
            .filter(|item| !item.content.trim().is_empty())
            .collect())
    }

    #[instrument(name = "llm.answer_question", skip_all, fields(context = context.len()))]
    async fn answer_question(&self, question: &str, context: &[FilteredItem]) -> Result<Answer> {
        let reply: AnswerReply = self
            .complete("answer_question", prompt::answer_question(question, context))
            .await?;
        let references = reply
            .references
            .into_iter()
            .filter_map(|reference| {
                reference.source.map(|source| Reference {
                    index: reference.index,
                    source,
                })
            })
            .collect();
        Ok(Answer {
            cited_text: reply.cited_answer,
            references,
        })
    }

    #[instrument(name = "llm.critique_answer", skip_all)]
    async fn critique_answer(&self, question: &str, answer_text: &str) -> Result<Critique> {
        let reply: CritiqueReply = self
            .complete("critique_answer", prompt::critique_answer(question, answer_text))
            .await?;
        Ok(Critique {
            is_good: reply.is_good,
            critique: reply.critique,
            missing_info: reply.missing_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatResponse;
    use std::sync::Mutex;

    struct CannedProvider {
        replies: Mutex<Vec<&'static str>>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedProvider {
        fn new(replies: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
            assert!(request.json_mode);
            let user = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(user);
            let content = self.replies.lock().unwrap().remove(0).to_string();
            Ok(ChatResponse {
                content,
                total_tokens: None,
            })
        }
    }

    #[tokio::test]
    async fn reason_reply_is_parsed_loosely() {
        let provider = CannedProvider::new(vec![
            r#"```json
{"thought": "check the price", "tool_name": "PriceLookup", "query": "bitcoin", "finish": false}
```"#,
        ]);
        let model = LlmResearchModel::new(provider.clone(), "test-model");
        let request = ReasonRequest {
            question: "BTC price?",
            clarification: None,
            history: &[],
            critique_feedback: None,
        };

        let proposed = model.reason_act(request).await.expect("parsed");
        assert_eq!(proposed.tool_name.as_deref(), Some("PriceLookup"));
        assert_eq!(proposed.finish, Some(false));
        assert!(provider.prompts.lock().unwrap()[0].contains("Question: BTC price?"));
    }

    #[tokio::test]
    async fn answer_drops_references_without_source() {
        let provider = CannedProvider::new(vec![
            r#"{"cited_answer": "BTC is $60,000 [0][1].", "references": [{"index": 0, "source": "http://a", "source_type": "url"}, {"index": 1, "source": null}]}"#,
        ]);
        let model = LlmResearchModel::new(provider, "test-model");
        let answer = model
            .answer_question("BTC?", &[FilteredItem::new("x", Some("http://a".into()))])
            .await
            .expect("parsed");
        assert_eq!(answer.cited_text, "BTC is $60,000 [0][1].");
        assert_eq!(
            answer.references,
            vec![Reference {
                index: 0,
                source: "http://a".into()
            }]
        );
    }

    #[tokio::test]
    async fn malformed_reply_is_an_error() {
        let provider = CannedProvider::new(vec!["I think the answer is good"]);
        let model = LlmResearchModel::new(provider, "test-model");
        let err = model.critique_answer("q", "a").await.unwrap_err();
        let agent_err = err.downcast_ref::<AgentError>().expect("agent error");
        assert!(matches!(
            agent_err,
            AgentError::InvalidResponse {
                function: "critique_answer",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn clarify_and_filter_map_into_core_types() {
        let provider = CannedProvider::new(vec![
            r#"{"needed": true, "question": " Which wallet? "}"#,
            r#"{"items": [{"content": "ETH fees fell 20%", "source": "https://x"}, {"content": "  "}]}"#,
        ]);
        let model = LlmResearchModel::new(provider, "test-model");

        let clarification = model.clarify("wallet recovery").await.expect("clarify");
        assert_eq!(
            clarification,
            Clarification {
                needed: true,
                question: "Which wallet?".into()
            }
        );

        let items = model
            .filter_results("ETH fees?", &[Observation::success("raw", None)])
            .await
            .expect("filter");
        assert_eq!(items, vec![FilteredItem::new("ETH fees fell 20%", Some("https://x".into()))]);
    }
}
