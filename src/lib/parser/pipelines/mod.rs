//! Splits an already-tokenized command line into the commands of a pipeline.

use itertools::Itertools;
use smallvec::SmallVec;
use std::{fmt, slice};

/// The tokens of a single command within a pipeline: the program name, its arguments,
/// and any redirection tokens, which are left for the command runner to interpret.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Segment<'a> {
    index:  usize,
    tokens: &'a [String],
}

impl<'a> Segment<'a> {
    pub const fn new(index: usize, tokens: &'a [String]) -> Self { Segment { index, tokens } }

    /// Position of this command within its pipeline, starting at zero.
    pub const fn index(&self) -> usize { self.index }

    pub const fn tokens(&self) -> &'a [String] { self.tokens }

    pub fn is_empty(&self) -> bool { self.tokens.is_empty() }

    /// The first token, which names the program for external commands.
    pub fn name(&self) -> Option<&'a str> { self.tokens.first().map(String::as_str) }
}

impl<'a> fmt::Display for Segment<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.iter().join(" "))
    }
}

/// The ordered commands of one pipeline invocation.
///
/// A pipeline always holds one more segment than there were delimiters in its source
/// tokens. Segments may be empty when delimiters are adjacent to each other or to either
/// end of the token sequence; those are rejected later by the command runner rather than
/// here.
#[derive(Debug, PartialEq, Clone)]
pub struct Pipeline<'a> {
    delimiter: &'a str,
    segments:  SmallVec<[Segment<'a>; 16]>,
}

impl<'a> Pipeline<'a> {
    pub fn len(&self) -> usize { self.segments.len() }

    /// Always false: even an empty token sequence yields one (empty) command.
    pub fn is_empty(&self) -> bool { self.segments.is_empty() }

    /// Number of channels needed to connect every command to its successor.
    pub fn channels(&self) -> usize { self.segments.len().saturating_sub(1) }

    pub fn requires_piping(&self) -> bool { self.segments.len() > 1 }

    pub fn delimiter(&self) -> &'a str { self.delimiter }

    pub fn segments(&self) -> &[Segment<'a>] { &self.segments }

    pub fn iter(&self) -> slice::Iter<'_, Segment<'a>> { self.segments.iter() }

    /// Reassembles the original token sequence by reinserting the delimiter between
    /// segments.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        for (id, segment) in self.segments.iter().enumerate() {
            if id != 0 {
                tokens.push(self.delimiter.to_owned());
            }
            tokens.extend(segment.tokens().iter().cloned());
        }
        tokens
    }
}

impl<'a, 'b> IntoIterator for &'b Pipeline<'a> {
    type IntoIter = slice::Iter<'b, Segment<'a>>;
    type Item = &'b Segment<'a>;

    fn into_iter(self) -> Self::IntoIter { self.segments.iter() }
}

impl<'a> fmt::Display for Pipeline<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let delimiter = [" ", self.delimiter, " "].concat();
        write!(f, "{}", self.segments.iter().join(&delimiter))
    }
}

/// Splits `tokens` at every occurrence of `delimiter` in a single left-to-right pass.
///
/// Each segment borrows a sub-slice of `tokens`; nothing is copied and the input is left
/// untouched.
pub fn segment<'a>(tokens: &'a [String], delimiter: &'a str) -> Pipeline<'a> {
    let segments = tokens
        .split(|token| token == delimiter)
        .enumerate()
        .map(|(index, tokens)| Segment::new(index, tokens))
        .collect();

    Pipeline { delimiter, segments }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &[&str]) -> Vec<String> { input.iter().map(|&t| t.to_owned()).collect() }

    fn segment_tokens<'a>(pipeline: &Pipeline<'a>) -> Vec<Vec<&'a str>> {
        pipeline
            .iter()
            .map(|segment| segment.tokens().iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn two_commands() {
        let input = tokens(&["printf", "a\nb\nc", "|", "grep", "b"]);
        let pipeline = segment(&input, "|");
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.channels(), 1);
        assert_eq!(segment_tokens(&pipeline), vec![vec!["printf", "a\nb\nc"], vec!["grep", "b"]]);
        assert_eq!(pipeline.segments()[1].index(), 1);
        assert_eq!(pipeline.segments()[1].name(), Some("grep"));
    }

    #[test]
    fn single_command_needs_no_channels() {
        let input = tokens(&["ls", "-l", "/tmp"]);
        let pipeline = segment(&input, "|");
        assert_eq!(pipeline.len(), 1);
        assert_eq!(pipeline.channels(), 0);
        assert!(!pipeline.requires_piping());
        assert_eq!(pipeline.segments()[0].tokens(), &input[..]);
    }

    #[test]
    fn empty_segments_pass_through() {
        let input = tokens(&["|", "cat", "|", "|", "wc", "|"]);
        let pipeline = segment(&input, "|");
        assert_eq!(
            segment_tokens(&pipeline),
            vec![vec![], vec!["cat"], vec![], vec!["wc"], vec![]]
        );
        assert!(pipeline.segments()[0].is_empty());
        assert_eq!(pipeline.segments()[0].name(), None);
    }

    #[test]
    fn empty_input_is_one_empty_command() {
        let input: Vec<String> = Vec::new();
        let pipeline = segment(&input, "|");
        assert_eq!(pipeline.len(), 1);
        assert!(pipeline.segments()[0].is_empty());
    }

    #[test]
    fn custom_delimiter() {
        let input = tokens(&["echo", "|", "::", "tr", "a", "b"]);
        let pipeline = segment(&input, "::");
        assert_eq!(segment_tokens(&pipeline), vec![vec!["echo", "|"], vec!["tr", "a", "b"]]);
        assert_eq!(pipeline.to_string(), "echo | :: tr a b");
    }

    #[test]
    fn segment_count_and_round_trip() {
        let cases: &[&[&str]] = &[
            &[],
            &["|"],
            &["a"],
            &["a", "|", "b", "|", "c"],
            &["|", "|", "|"],
            &["x", "y", "|", "|", "z", "|"],
            &["cat", "<", "in.txt", "|", "sort", ">", "out.txt"],
        ];

        for case in cases {
            let input = tokens(case);
            let delimiters = input.iter().filter(|t| *t == "|").count();
            let pipeline = segment(&input, "|");
            assert_eq!(pipeline.len(), delimiters + 1, "{:?}", case);
            assert_eq!(pipeline.to_tokens(), input, "{:?}", case);
            for (id, segment) in pipeline.iter().enumerate() {
                assert_eq!(segment.index(), id);
                assert!(segment.tokens().iter().all(|t| t != "|"));
            }
        }
    }

    #[test]
    fn display() {
        let input = tokens(&["printf", "x", "|", "grep", "x", "|", "wc", "-l"]);
        assert_eq!(segment(&input, "|").to_string(), "printf x | grep x | wc -l");
    }
}
