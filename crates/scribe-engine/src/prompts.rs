use serde::{Deserialize, Serialize};

use crate::extractor::Corpus;

const CLASSIFY: &str = r#"Please return a list of extensions that identify files containing source code.
The format should be a list of extension separated by commas. Your response should only
be the list of extension, or ".c" if no extension in the original list is an extension of source code file.
Example input :
csv,ts,jpg,cpp,java
Output :
ts,c,cpp,java

Here is the input :
{extensions}"#;

const INGEST_FILES: &str = "Here is a code repository. Just respond \"OK\".\nCode files :\n{files}";

const INGEST_PATHS: &str =
    "Here is the list of files in the project :\n{paths}\nJust respond with \"OK\".";

const DESCRIBE: &str = "Now write a description in two part of approximately the same length. It is a internal description that will help other internal developers understand the project.
Focus on objective points and description instead of subjective thoughts such as why the project is well-written.
The first part focuses on the purpose of the project, and should be business oriented. Be specific and get into the details of the business logic.
The second part focuses on how the project works internally.
Write your answer in {language}.";

const REFINE_SUFFIX: &str = "\n\nRenvoie le README complet avec les modifications.";

/// Wording of every prompt the service sends.
///
/// Placeholders: `{extensions}` in `classify`, `{files}` in `ingest_files`,
/// `{paths}` in `ingest_paths`, `{language}` in `describe`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub language: String,
    pub classify: String,
    pub ingest_files: String,
    pub ingest_paths: String,
    pub describe: String,
    pub refine_suffix: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            language: "french".into(),
            classify: CLASSIFY.into(),
            ingest_files: INGEST_FILES.into(),
            ingest_paths: INGEST_PATHS.into(),
            describe: DESCRIBE.into(),
            refine_suffix: REFINE_SUFFIX.into(),
        }
    }
}

impl PromptTemplates {
    pub fn classify<S: AsRef<str>>(&self, extensions: &[S]) -> String {
        let joined = extensions
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        self.classify.replace("{extensions}", &joined)
    }

    /// Every file as `path : \ncontent\n`, in corpus order.
    pub fn ingest_files(&self, corpus: &Corpus) -> String {
        let files: String = corpus
            .iter()
            .map(|(path, content)| format!("{path} : \n{content}\n"))
            .collect();
        self.ingest_files.replace("{files}", &files)
    }

    pub fn ingest_paths(&self, corpus: &Corpus) -> String {
        let paths = corpus.keys().map(String::as_str).collect::<Vec<_>>().join("\n");
        self.ingest_paths.replace("{paths}", &paths)
    }

    pub fn describe(&self) -> String {
        self.describe.replace("{language}", &self.language)
    }

    pub fn refine(&self, message: &str) -> String {
        format!("{message}{}", self.refine_suffix)
    }
}
