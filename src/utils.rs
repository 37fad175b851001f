// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Small shared helpers

use std::sync::{Mutex, MutexGuard};

use crate::error::{ApiError, PluribotsError};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(lock = what, "lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// First `max` characters of `text`, never splitting a character
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Format an error for display to the user
pub fn format_error(error: &PluribotsError) -> String {
    match error {
        PluribotsError::Api(ApiError::ContextTooLong { current, limit }) => {
            let mut msg = String::from("Context too long: ");
            if *current > 0 && *limit > 0 {
                msg.push_str(&format!(
                    "{} tokens exceeds {} token limit.",
                    format_number(*current),
                    format_number(*limit)
                ));
            } else {
                msg.push_str("the prompt exceeds the model's context window.");
            }
            msg
        }
        PluribotsError::Api(api_error) => format!("API Error: {}", api_error),
        PluribotsError::ProviderUnavailable(_) => {
            format!("{}. Check API keys with `pluribots agents`.", error)
        }
        _ => format!("Error: {}", error),
    }
}

/// Format a number with thousand separators for readability
fn format_number(n: u32) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.insert(0, ',');
        }
        result.insert(0, c);
    }
    result
}
