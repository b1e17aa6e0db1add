//! Assessment Item Model
//!
//! Assessment items belong to exactly one exercise node. Question, answer
//! and hint text may embed image references and formula markup; both are
//! normalized by the exercise bundler at export time.

use serde::{Deserialize, Serialize};

/// Recognized assessment item types.
///
/// True/false items are a presentation alias of single selection and share
/// its rendering. An item whose stored type does not parse is a hard error
/// for the owning exercise's bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentType {
    MultipleSelection,
    SingleSelection,
    TrueFalse,
    InputQuestion,
    FreeResponse,
}

impl AssessmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentType::MultipleSelection => "multiple_selection",
            AssessmentType::SingleSelection => "single_selection",
            AssessmentType::TrueFalse => "true_false",
            AssessmentType::InputQuestion => "input_question",
            AssessmentType::FreeResponse => "free_response",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "multiple_selection" => Some(AssessmentType::MultipleSelection),
            "single_selection" => Some(AssessmentType::SingleSelection),
            "true_false" => Some(AssessmentType::TrueFalse),
            "input_question" => Some(AssessmentType::InputQuestion),
            "free_response" => Some(AssessmentType::FreeResponse),
            _ => None,
        }
    }
}

/// Mastery model identifiers as stored in exercise `extra_fields`.
///
/// Legacy fixed patterns are preserved in exported metadata, but an explicit
/// normalized m-of-n form is always emitted alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasteryModel {
    #[serde(rename = "m_of_n")]
    MOfN,
    #[serde(rename = "do_all")]
    DoAll,
    #[serde(rename = "num_correct_in_a_row_2")]
    NumCorrectInARow2,
    #[serde(rename = "num_correct_in_a_row_3")]
    NumCorrectInARow3,
    #[serde(rename = "num_correct_in_a_row_5")]
    NumCorrectInARow5,
    #[serde(rename = "num_correct_in_a_row_10")]
    NumCorrectInARow10,
}

impl MasteryModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasteryModel::MOfN => "m_of_n",
            MasteryModel::DoAll => "do_all",
            MasteryModel::NumCorrectInARow2 => "num_correct_in_a_row_2",
            MasteryModel::NumCorrectInARow3 => "num_correct_in_a_row_3",
            MasteryModel::NumCorrectInARow5 => "num_correct_in_a_row_5",
            MasteryModel::NumCorrectInARow10 => "num_correct_in_a_row_10",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "m_of_n" => Some(MasteryModel::MOfN),
            "do_all" => Some(MasteryModel::DoAll),
            "num_correct_in_a_row_2" => Some(MasteryModel::NumCorrectInARow2),
            "num_correct_in_a_row_3" => Some(MasteryModel::NumCorrectInARow3),
            "num_correct_in_a_row_5" => Some(MasteryModel::NumCorrectInARow5),
            "num_correct_in_a_row_10" => Some(MasteryModel::NumCorrectInARow10),
            _ => None,
        }
    }
}

/// One question belonging to an exercise node.
///
/// `answers` and `hints` hold JSON arrays as authored by the editing
/// surface; `item_type` is kept raw here and parsed by the bundler so that
/// unrecognized types surface as export errors rather than load errors.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentItem {
    pub assessment_id: String,
    pub node_id: String,
    pub item_type: String,
    pub question: String,
    /// JSON array of `{"answer": ..., "correct": ..., "order": ...}` objects.
    pub answers: String,
    /// JSON array of `{"hint": ..., "order": ...}` objects.
    pub hints: String,
    /// Raw pre-rendered item definition, used by free-response items.
    pub raw_data: String,
    pub order: i64,
    pub randomize: bool,
}
