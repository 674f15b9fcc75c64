use std::collections::HashMap;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::{Suggestion, SuggestionKind, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Yes,
    No,
    Global,
}

impl Response {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" => Some(Response::Yes),
            "n" | "no" => Some(Response::No),
            "g" | "global" => Some(Response::Global),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalChoice {
    PerformAlways,
    SkipAlways,
}

impl GlobalChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" => Some(GlobalChoice::PerformAlways),
            "n" | "no" => Some(GlobalChoice::SkipAlways),
            _ => None,
        }
    }

    pub fn verdict(self) -> Verdict {
        match self {
            GlobalChoice::PerformAlways => Verdict::Perform,
            GlobalChoice::SkipAlways => Verdict::Skip,
        }
    }
}

/// Per-kind verdicts chosen with a "global" answer. Lives for one run only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandingPolicies {
    by_kind: HashMap<SuggestionKind, Verdict>,
}

impl StandingPolicies {
    pub fn get(&self, kind: SuggestionKind) -> Option<Verdict> {
        self.by_kind.get(&kind).copied()
    }

    fn install(&mut self, kind: SuggestionKind, verdict: Verdict) -> Verdict {
        *self.by_kind.entry(kind).or_insert(verdict)
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Operator,
    NewStandingPolicy,
    StandingPolicy,
    EndOfInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub verdict: Verdict,
    pub source: VerdictSource,
}

impl Resolution {
    fn new(verdict: Verdict, source: VerdictSource) -> Self {
        Self { verdict, source }
    }
}

pub struct Resolver<R, W> {
    input: R,
    output: W,
    policies: StandingPolicies,
}

impl<R, W> Resolver<R, W>
where
    R: BufRead,
    W: Write,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            policies: StandingPolicies::default(),
        }
    }

    pub fn policies(&self) -> &StandingPolicies {
        &self.policies
    }

    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }

    /// Maps one suggestion to a verdict. A standing policy for the kind answers without
    /// reading input; running out of input skips the suggestion.
    pub fn resolve(&mut self, suggestion: &Suggestion) -> Resolution {
        if let Some(verdict) = self.policies.get(suggestion.kind) {
            self.say(&format!(
                "Standing policy {} for {}: {}",
                verdict,
                suggestion.kind,
                suggestion.subject_path.display()
            ));
            return Resolution::new(verdict, VerdictSource::StandingPolicy);
        }

        self.present(suggestion);
        let prompt = format!(
            "Apply {} to this file? [y]es, [n]o, [g]lobal (all {}): ",
            suggestion.action, suggestion.kind
        );
        loop {
            let Some(answer) = self.read_answer(&prompt) else {
                return Resolution::new(Verdict::Skip, VerdictSource::EndOfInput);
            };
            match Response::parse(&answer) {
                Some(Response::Yes) => {
                    return Resolution::new(Verdict::Perform, VerdictSource::Operator)
                }
                Some(Response::No) => return Resolution::new(Verdict::Skip, VerdictSource::Operator),
                Some(Response::Global) => {
                    let Some(choice) = self.ask_global(suggestion) else {
                        return Resolution::new(Verdict::Skip, VerdictSource::EndOfInput);
                    };
                    let verdict = self.policies.install(suggestion.kind, choice.verdict());
                    info!("standing policy {} installed for {}", verdict, suggestion.kind);
                    self.say(&format!(
                        "Standing policy {} set for every {} suggestion.",
                        verdict, suggestion.kind
                    ));
                    return Resolution::new(verdict, VerdictSource::NewStandingPolicy);
                }
                None => self.say("Unrecognised answer; use y, n or g."),
            }
        }
    }

    /// Plain yes/no question. End of input counts as "no".
    pub fn confirm(&mut self, question: &str) -> bool {
        let prompt = format!("{question} [y/n]: ");
        loop {
            let Some(answer) = self.read_answer(&prompt) else {
                return false;
            };
            match Response::parse(&answer) {
                Some(Response::Yes) => return true,
                Some(Response::No) => return false,
                _ => self.say("Unrecognised answer; use y or n."),
            }
        }
    }

    fn ask_global(&mut self, suggestion: &Suggestion) -> Option<GlobalChoice> {
        let prompt = format!(
            "Always perform {} for {} (y) or always skip (n)? [y/n]: ",
            suggestion.action, suggestion.kind
        );
        loop {
            let answer = self.read_answer(&prompt)?;
            match GlobalChoice::parse(&answer) {
                Some(choice) => return Some(choice),
                None => self.say("Unrecognised answer; use y or n."),
            }
        }
    }

    fn present(&mut self, suggestion: &Suggestion) {
        self.say("");
        self.say(&format!(
            "--- {} | {} ---",
            suggestion.kind,
            suggestion.subject_path.display()
        ));
        self.say(&format!("Problem:    {}", suggestion.reason));
        match &suggestion.destination_path {
            Some(destination) => self.say(&format!(
                "Suggested:  {} -> {}",
                suggestion.action,
                destination.display()
            )),
            None => self.say(&format!("Suggested:  {}", suggestion.action)),
        }
    }

    fn read_answer(&mut self, prompt: &str) -> Option<String> {
        let _ = write!(self.output, "{prompt}");
        let _ = self.output.flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => {
                let _ = writeln!(self.output);
                None
            }
            Ok(_) => Some(line.trim().to_string()),
            Err(err) => {
                warn!("failed to read operator input: {err}; treating as end of input");
                None
            }
        }
    }

    fn say(&mut self, line: &str) {
        let _ = writeln!(self.output, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::PathBuf;

    use super::{Resolver, Response, VerdictSource};
    use crate::model::{Suggestion, SuggestionKind, Verdict};

    fn duplicate(path: &str) -> Suggestion {
        Suggestion::delete(
            SuggestionKind::Duplicate,
            PathBuf::from(path),
            "Identical content.".to_string(),
        )
    }

    fn resolver(script: &str) -> Resolver<Cursor<Vec<u8>>, Vec<u8>> {
        Resolver::new(Cursor::new(script.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn parses_closed_response_set() {
        assert_eq!(Response::parse(" Y "), Some(Response::Yes));
        assert_eq!(Response::parse("no"), Some(Response::No));
        assert_eq!(Response::parse("G"), Some(Response::Global));
        assert_eq!(Response::parse("t"), None);
        assert_eq!(Response::parse(""), None);
    }

    #[test]
    fn yes_and_no_apply_to_single_suggestion() {
        let mut resolver = resolver("y\nn\n");
        let first = resolver.resolve(&duplicate("/a"));
        let second = resolver.resolve(&duplicate("/b"));

        assert_eq!(first.verdict, Verdict::Perform);
        assert_eq!(second.verdict, Verdict::Skip);
        assert_eq!(second.source, VerdictSource::Operator);
        assert!(resolver.policies().is_empty());
    }

    #[test]
    fn standing_policy_consumes_no_input() {
        let mut resolver = resolver("g\ny\nn\n");
        let first = resolver.resolve(&duplicate("/a"));
        assert_eq!(first.verdict, Verdict::Perform);
        assert_eq!(first.source, VerdictSource::NewStandingPolicy);
        let after_global = resolver.input.position();

        for path in ["/b", "/c", "/d"] {
            let resolution = resolver.resolve(&duplicate(path));
            assert_eq!(resolution.verdict, Verdict::Perform);
            assert_eq!(resolution.source, VerdictSource::StandingPolicy);
        }
        assert_eq!(resolver.input.position(), after_global);

        let rename = Suggestion::rename(
            PathBuf::from("/a:b"),
            PathBuf::from("/a_b"),
            "test".to_string(),
        );
        let resolution = resolver.resolve(&rename);
        assert_eq!(resolution.verdict, Verdict::Skip);
        assert_eq!(resolution.source, VerdictSource::Operator);
        assert!(resolver.input.position() > after_global);
    }

    #[test]
    fn global_skip_installs_skip_policy_after_reprompt() {
        let mut resolver = resolver("g\nmaybe\nn\n");
        let resolution = resolver.resolve(&duplicate("/a"));

        assert_eq!(resolution.verdict, Verdict::Skip);
        assert_eq!(
            resolver.policies().get(SuggestionKind::Duplicate),
            Some(Verdict::Skip)
        );
        assert_eq!(resolver.resolve(&duplicate("/b")).verdict, Verdict::Skip);
    }

    #[test]
    fn unrecognised_input_reprompts() {
        let mut resolver = resolver("t\n\ny\n");
        let resolution = resolver.resolve(&duplicate("/a"));
        assert_eq!(resolution.verdict, Verdict::Perform);

        let (_, output) = resolver.into_parts();
        let transcript = String::from_utf8(output).expect("utf8 transcript");
        assert_eq!(transcript.matches("Unrecognised answer").count(), 2);
        assert!(transcript.contains("Identical content."));
    }

    #[test]
    fn end_of_input_skips_cleanly() {
        let mut drained = resolver("");
        for path in ["/a", "/b"] {
            let resolution = drained.resolve(&duplicate(path));
            assert_eq!(resolution.verdict, Verdict::Skip);
            assert_eq!(resolution.source, VerdictSource::EndOfInput);
        }

        let mut cut_short = resolver("g\n");
        let resolution = cut_short.resolve(&duplicate("/a"));
        assert_eq!(resolution.source, VerdictSource::EndOfInput);
        assert!(cut_short.policies().is_empty());
    }

    #[test]
    fn confirm_accepts_yes_no_and_defaults_to_no_at_eof() {
        let mut resolver = resolver("what\ny\nn\n");
        assert!(resolver.confirm("Start?"));
        assert!(!resolver.confirm("Again?"));
        assert!(!resolver.confirm("Once more?"));
    }
}
