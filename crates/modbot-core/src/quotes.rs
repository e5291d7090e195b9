//! Quote book operations over the store.
//!
//! Quotes are addressed by 1-based position in id order. Every call fetches
//! the full list fresh, so a deletion shifts all later positions down by one.

use rand::Rng;

use crate::{storage::Store, Result};

/// Outcome of a quote operation: the chat reply and whether the quote list changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteReply {
    pub text: String,
    pub changed: bool,
}

impl QuoteReply {
    fn unchanged(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            changed: false,
        }
    }

    fn changed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            changed: true,
        }
    }
}

pub const NO_QUOTES: &str = "No quotes currently exist";
pub const QUOTE_NOT_FOUND: &str = "That quote does not exist";
pub const NEED_DIGIT: &str = "You must use a digit to specify a quote.";
pub const NEED_TEXT: &str = "You must provide a quote to add.";

pub fn get_quote(store: &Store, position: usize) -> Result<QuoteReply> {
    let quotes = store.list_quotes()?;
    let reply = match position.checked_sub(1).and_then(|idx| quotes.get(idx)) {
        Some(quote) => format!("#{position} {}", quote.text),
        None => format!(
            "Invalid quote id - there are only {} quotes",
            quotes.len()
        ),
    };
    Ok(QuoteReply::unchanged(reply))
}

pub fn get_random_quote(store: &Store, rng: &mut impl Rng) -> Result<QuoteReply> {
    let quotes = store.list_quotes()?;
    if quotes.is_empty() {
        return Ok(QuoteReply::unchanged(NO_QUOTES));
    }
    let idx = rng.gen_range(0..quotes.len());
    let reply = format!("#{} {}", idx + 1, quotes[idx].text);
    Ok(QuoteReply::unchanged(reply))
}

pub fn add_quote(store: &Store, text: &str) -> Result<QuoteReply> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(QuoteReply::unchanged(NEED_TEXT));
    }
    let count = store.add_quote(text)?;
    Ok(QuoteReply::changed(format!("Quote added as quote #{count}.")))
}

pub fn edit_quote(store: &Store, position: usize, text: &str) -> Result<QuoteReply> {
    let quotes = store.list_quotes()?;
    let Some(quote) = position.checked_sub(1).and_then(|idx| quotes.get(idx)) else {
        return Ok(QuoteReply::unchanged(QUOTE_NOT_FOUND));
    };
    store.update_quote(quote.id, text.trim())?;
    Ok(QuoteReply::changed("Quote has been edited."))
}

pub fn delete_quote(store: &Store, position: usize) -> Result<QuoteReply> {
    let quotes = store.list_quotes()?;
    let Some(quote) = position.checked_sub(1).and_then(|idx| quotes.get(idx)) else {
        return Ok(QuoteReply::unchanged(QUOTE_NOT_FOUND));
    };
    store.delete_quote(quote.id)?;
    Ok(QuoteReply::changed("Quote deleted"))
}
