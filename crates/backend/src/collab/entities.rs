//! Regex entity extraction for contract text

use std::sync::LazyLock;

use docflow_core::Entities;
use regex::Regex;

use super::EntityExtractor;

// 12345 or 12345-6789
static ZIPCODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{5}(?:-\d{4})?)\b").unwrap());

static DOMAIN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\b(?:[a-zA-Z0-9-]+\.)+[a-zA-Z]{2,63}\b").unwrap());

static URL: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"https?://(?:[-\w.]|(?:%[\da-fA-F]{2}))+").unwrap());

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b(?:\+?\d{1,3}[\s.-]?)?\(?\d{1,4}\)?[\s.-]?\d{1,4}[\s.-]?\d{1,9}\b").unwrap()
});

// Plain addresses, optionally wrapped in brackets
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b[\(\[]?(?:at\s+)?([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})[\)\]]?\b").unwrap()
});

// "jane at example.com" / "jane (at) example.com"
static AT_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"([a-zA-Z0-9._%+-]+)\s+(?:\(at\)|at)\s+([a-zA-Z0-9.-]+\.[a-zA-Z]{2,})").unwrap()
});

/// Keeps first occurrence order, drops repeats.
fn push_unique(into: &mut Vec<String>, value: &str) {
  if !into.iter().any(|v| v == value) {
    into.push(value.to_string());
  }
}

fn find_all(re: &Regex, text: &str) -> Vec<String> {
  let mut found = Vec::new();
  for m in re.find_iter(text) {
    push_unique(&mut found, m.as_str());
  }
  found
}

fn find_group(re: &Regex, text: &str) -> Vec<String> {
  let mut found = Vec::new();
  for caps in re.captures_iter(text) {
    if let Some(m) = caps.get(1) {
      push_unique(&mut found, m.as_str());
    }
  }
  found
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexEntityExtractor;

impl EntityExtractor for RegexEntityExtractor {
  fn extract(&self, text: &str) -> Entities {
    let mut emails = find_group(&EMAIL, text);
    for caps in AT_EMAIL.captures_iter(text) {
      if let (Some(user), Some(domain)) = (caps.get(1), caps.get(2)) {
        push_unique(&mut emails, &format!("{}@{}", user.as_str(), domain.as_str()));
      }
    }

    Entities {
      zipcodes: find_group(&ZIPCODE, text),
      domains: find_all(&DOMAIN, text),
      urls: find_all(&URL, text),
      phone_numbers: find_all(&PHONE, text),
      emails,
    }
  }
}
