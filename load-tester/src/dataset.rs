//! Loading prompt/reference pairs from line-delimited JSON files.
use crate::error::{DatasetError, TokenizerError};
use crate::record::{Category, PromptPair};
use crate::tokens::TokenCounter;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Line layout of a dataset file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DatasetFormat {
    /// `{"question": .., "answer": ..}`
    QuestionAnswer,
    /// `{"conversation": [{"input": .., "output": ..}, ..]}`, first turn only.
    Conversation,
}

impl DatasetFormat {
    #[must_use]
    pub fn category(self) -> Category {
        match self {
            DatasetFormat::QuestionAnswer => Category::Arxiv,
            DatasetFormat::Conversation => Category::PureDove,
        }
    }
}

#[derive(Deserialize)]
struct QuestionAnswerLine {
    question: Option<String>,
    answer: Option<String>,
}

#[derive(Deserialize)]
struct ConversationLine {
    #[serde(default)]
    conversation: Option<Vec<Turn>>,
}

#[derive(Deserialize)]
struct Turn {
    input: String,
    output: String,
}

pub fn load_jsonl(path: &Path, format: DatasetFormat) -> Result<Vec<PromptPair>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let pairs = parse_jsonl(BufReader::new(file), path, format)?;
    tracing::info!(path = %path.display(), prompts = pairs.len(), "loaded dataset");
    Ok(pairs)
}

/// Parses an already opened dataset. `path` only labels errors.
pub fn parse_jsonl<R: BufRead>(
    reader: R,
    path: &Path,
    format: DatasetFormat,
) -> Result<Vec<PromptPair>, DatasetError> {
    let category = format.category();
    let mut pairs = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let invalid = |source| DatasetError::InvalidJson {
            path: path.to_path_buf(),
            line: line_no,
            source,
        };
        let missing = |field| DatasetError::MissingField {
            path: path.to_path_buf(),
            line: line_no,
            field,
        };
        match format {
            DatasetFormat::QuestionAnswer => {
                let parsed: QuestionAnswerLine = serde_json::from_str(&line).map_err(invalid)?;
                let question = parsed.question.ok_or_else(|| missing("question"))?;
                let answer = parsed.answer.ok_or_else(|| missing("answer"))?;
                pairs.push(PromptPair::new(question, answer, category));
            }
            DatasetFormat::Conversation => {
                let parsed: ConversationLine = serde_json::from_str(&line).map_err(invalid)?;
                // Lines without a conversation, or with an empty one, carry no prompt.
                if let Some(first) = parsed.conversation.and_then(|turns| turns.into_iter().next()) {
                    pairs.push(PromptPair::new(first.input, first.output, category));
                }
            }
        }
    }
    Ok(pairs)
}

/// Optional trimming applied after loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetFilter {
    /// Drop pairs whose prompt has more tokens than this.
    pub max_prompt_tokens: Option<usize>,
    /// Keep at most this many pairs, in file order.
    pub max_prompts: Option<usize>,
}

impl DatasetFilter {
    pub fn apply(
        &self,
        pairs: Vec<PromptPair>,
        counter: &dyn TokenCounter,
    ) -> Result<Vec<PromptPair>, TokenizerError> {
        let limit = self.max_prompts.unwrap_or(usize::MAX);
        let mut kept = Vec::with_capacity(pairs.len().min(limit));
        for pair in pairs {
            if kept.len() >= limit {
                break;
            }
            if let Some(max) = self.max_prompt_tokens {
                if counter.count_tokens(&pair.input)? > max {
                    continue;
                }
            }
            kept.push(pair);
        }
        Ok(kept)
    }
}

/// All loaded prompts, partitioned by category.
#[derive(Debug, Clone, Default)]
pub struct PromptPool {
    by_category: BTreeMap<Category, Vec<PromptPair>>,
}

impl PromptPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds pairs under their own categories.
    pub fn extend(&mut self, pairs: impl IntoIterator<Item = PromptPair>) {
        for pair in pairs {
            self.by_category.entry(pair.category).or_default().push(pair);
        }
    }

    #[must_use]
    pub fn prompts(&self, category: Category) -> &[PromptPair] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<PromptPair> for PromptPool {
    fn from_iter<T: IntoIterator<Item = PromptPair>>(iter: T) -> Self {
        let mut pool = PromptPool::new();
        pool.extend(iter);
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::WhitespaceTokenCounter;
    use std::io::Write;

    fn parse(input: &str, format: DatasetFormat) -> Result<Vec<PromptPair>, DatasetError> {
        parse_jsonl(input.as_bytes(), Path::new("test.jsonl"), format)
    }

    #[test]
    fn parses_question_answer_lines() {
        let input = concat!(
            r#"{"question": "What is 1 + 1?", "answer": "2"}"#,
            "\n\n",
            r#"{"question": "Integrate x", "answer": "x^2 / 2", "extra": true}"#,
            "\n",
        );
        let pairs = parse(input, DatasetFormat::QuestionAnswer).unwrap();
        assert_eq!(
            pairs,
            vec![
                PromptPair::new("What is 1 + 1?", "2", Category::Arxiv),
                PromptPair::new("Integrate x", "x^2 / 2", Category::Arxiv),
            ]
        );
    }

    #[test]
    fn question_answer_requires_both_fields() {
        let err = parse(r#"{"question": "orphan"}"#, DatasetFormat::QuestionAnswer).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::MissingField {
                line: 1,
                field: "answer",
                ..
            }
        ));
    }

    #[test]
    fn conversation_takes_first_turn_and_skips_empty() {
        let input = concat!(
            r#"{"conversation": [{"input": "hi", "output": "hello"}, {"input": "bye", "output": "ciao"}]}"#,
            "\n",
            r#"{"conversation": []}"#,
            "\n",
            r#"{"source": "no conversation here"}"#,
            "\n",
        );
        let pairs = parse(input, DatasetFormat::Conversation).unwrap();
        assert_eq!(pairs, vec![PromptPair::new("hi", "hello", Category::PureDove)]);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let input = "{\"conversation\": []}\nnot json\n";
        let err = parse(input, DatasetFormat::Conversation).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidJson { line: 2, .. }));
        assert!(err.to_string().starts_with("test.jsonl:2:"));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"question": "q1", "answer": "a1"}}"#).unwrap();
        writeln!(file, r#"{{"question": "q2", "answer": "a2"}}"#).unwrap();
        let pairs = load_jsonl(file.path(), DatasetFormat::QuestionAnswer).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].input, "q2");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = load_jsonl(Path::new("/nonexistent/data.jsonl"), DatasetFormat::Conversation)
            .unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn filter_drops_long_prompts_and_caps_count() {
        let pairs = vec![
            PromptPair::new("short one", "r", Category::Arxiv),
            PromptPair::new("this prompt is far too long", "r", Category::Arxiv),
            PromptPair::new("short two", "r", Category::Arxiv),
            PromptPair::new("short three", "r", Category::Arxiv),
        ];
        let filter = DatasetFilter {
            max_prompt_tokens: Some(3),
            max_prompts: Some(2),
        };
        let kept = filter.apply(pairs, &WhitespaceTokenCounter).unwrap();
        let inputs: Vec<_> = kept.iter().map(|p| p.input.as_str()).collect();
        assert_eq!(inputs, vec!["short one", "short two"]);
    }

    #[test]
    fn pool_partitions_by_category() {
        let pool: PromptPool = vec![
            PromptPair::new("a", "b", Category::Arxiv),
            PromptPair::new("c", "d", Category::PureDove),
            PromptPair::new("e", "f", Category::PureDove),
        ]
        .into_iter()
        .collect();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.prompts(Category::Arxiv).len(), 1);
        assert_eq!(pool.prompts(Category::PureDove).len(), 2);
        assert!(PromptPool::new().prompts(Category::Arxiv).is_empty());
    }
}
