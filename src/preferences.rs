//! Buyer preference collection and conversion into a search query.

use std::io::{BufRead, Write};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HomeMatchError, Result};
use crate::llm::{refine_input, ChatModel};

/// Questionnaire shown in interactive mode, one answer per category.
pub const QUESTIONS: [&str; 7] = [
    "In which state(s) would you like to look for a property?",
    "Which city or cities?",
    "How big do you want your house to be?",
    "What are the three most important factors for you in choosing this property?",
    "Which amenities would you like?",
    "Which transportation options are important to you?",
    "How urban do you want your neighborhood to be?",
];

/// Answers used when the questionnaire runs non-interactively.
pub const DEFAULT_ANSWERS: [&str; 7] = [
    "California, Colorado",
    "Mountain View, Cupertino, Denver",
    "A comfortable three-bedroom house with a spacious kitchen and a cozy living room.",
    "A quiet neighborhood, good local schools, convenient shopping options.",
    "Backyard for gardening, two-car garage, energy-efficient heating system.",
    "Reliable bus line, proximity to a major highway, bike-friendly roads.",
    "A balance between suburban tranquility and urban amenities like restaurants and theaters.",
];

static LIST_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*").expect("valid regex"));

/// Structured buyer preferences for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuyerPreferences {
    pub state: Vec<String>,
    pub city: Vec<String>,
    pub house_size: String,
    pub key_factors: Vec<String>,
    pub amenities: Vec<String>,
    pub transportation: Vec<String>,
    pub urban_preference: String,
    /// Form-only fields.
    pub max_price: Option<String>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub description: Option<String>,
}

impl BuyerPreferences {
    /// Natural-language query that gets embedded for the similarity search.
    pub fn query_text(&self) -> String {
        let mut query = format!(
            "Looking for a property in {}, {}. ",
            join_or(&self.city, "any city"),
            join_or(&self.state, "any state")
        );
        query.push_str(&format!(
            "House size preference: {}. ",
            text_or(&self.house_size, "any size")
        ));
        query.push_str(&format!(
            "Maximum price: {}. ",
            self.max_price
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or("no limit")
                .trim()
        ));
        query.push_str(&format!(
            "Number of Bedrooms: {}. ",
            self.bedrooms.map_or_else(|| "any".to_string(), |n| n.to_string())
        ));
        query.push_str(&format!(
            "Number of Bathrooms: {}. ",
            self.bathrooms.map_or_else(|| "any".to_string(), |n| n.to_string())
        ));
        query.push_str(&format!("Amenities: {}.", join_or(&self.amenities, "none")));
        if !self.key_factors.is_empty() {
            query.push_str(&format!(" Important factors: {}.", self.key_factors.join(", ")));
        }
        if !self.transportation.is_empty() {
            query.push_str(&format!(" Transportation: {}.", self.transportation.join(", ")));
        }
        if !self.urban_preference.trim().is_empty() {
            query.push_str(&format!(" Neighborhood: {}.", self.urban_preference.trim()));
        }
        let description = self.description.as_deref().map(str::trim);
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            query.push_str(&format!(" Property description: {description}."));
        }
        query
    }
}

fn join_or(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

fn text_or<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    let text = text.trim();
    if text.is_empty() {
        fallback
    } else {
        text
    }
}

/// Splits a comma-separated answer, dropping empty items.
pub fn split_list(answer: &str) -> Vec<String> {
    LIST_SEPARATOR
        .split(answer.trim())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Maps questionnaire answers (in [`QUESTIONS`] order) to preferences.
pub fn parse_preferences<S: AsRef<str>>(answers: &[S]) -> Result<BuyerPreferences> {
    if answers.len() < QUESTIONS.len() {
        return Err(HomeMatchError::EmptyInput(format!(
            "expected {} answers, got {}",
            QUESTIONS.len(),
            answers.len()
        )));
    }
    let answer = |i: usize| answers[i].as_ref();
    Ok(BuyerPreferences {
        state: split_list(answer(0)),
        city: split_list(answer(1)),
        house_size: answer(2).trim().to_string(),
        key_factors: split_list(answer(3)),
        amenities: split_list(answer(4)),
        transportation: split_list(answer(5)),
        urban_preference: answer(6).trim().to_string(),
        ..BuyerPreferences::default()
    })
}

/// Gathers questionnaire answers from a reader or the defaults.
pub struct PreferenceCollector<'a> {
    interactive: bool,
    refiner: Option<&'a dyn ChatModel>,
}

impl<'a> PreferenceCollector<'a> {
    /// `refiner` cleans up each answer before parsing when set.
    pub fn new(interactive: bool, refiner: Option<&'a dyn ChatModel>) -> Self {
        Self {
            interactive,
            refiner,
        }
    }

    /// Runs the questionnaire against `input`, echoing prompts to `output`.
    pub async fn collect<R, W>(&self, input: &mut R, output: &mut W) -> Result<BuyerPreferences>
    where
        R: BufRead,
        W: Write,
    {
        let mut answers: Vec<String> = if self.interactive {
            ask_questions(input, output)?
        } else {
            DEFAULT_ANSWERS.iter().map(|a| a.to_string()).collect()
        };

        if let Some(chat) = self.refiner {
            for answer in &mut answers {
                *answer = refine_input(chat, answer).await;
            }
        }

        parse_preferences(answers.as_slice())
    }
}

fn ask_questions<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Vec<String>> {
    writeln!(output, "\nHome Preference Questionnaire\n")?;
    writeln!(
        output,
        "Please answer the following questions to get a personalized home recommendation.\n"
    )?;
    let mut answers = Vec::with_capacity(QUESTIONS.len());
    for question in QUESTIONS {
        write!(output, "{question} ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(HomeMatchError::EmptyInput(
                "input closed before the questionnaire finished".to_string(),
            ));
        }
        answers.push(line.trim().to_string());
    }
    Ok(answers)
}
