pub mod pipelines;

pub use self::pipelines::{segment, Pipeline, Segment};

#[cfg(fuzzing)]
pub mod fuzzing {
    use super::*;

    pub fn pipeline_segment(data: &str) {
        let tokens: Vec<String> = data.split_whitespace().map(String::from).collect();
        let pipeline = segment(&tokens, "|");
        assert_eq!(pipeline.to_tokens(), tokens);
    }
}
