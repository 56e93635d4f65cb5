/// Error analysis coordinator and backend implementations
pub mod analyzer;
pub mod backends;

pub use analyzer::{split_analysis, AnalysisParts, ErrorAnalyzer, ANALYSIS_UNAVAILABLE};
pub use backends::{
    AnalysisBackend, AnalysisRequest, AzureOpenAIBackend, MockBackend, OpenAIBackend,
};
