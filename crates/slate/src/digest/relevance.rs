// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::dataset::Frame;
use rayon::prelude::*;

pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Term-frequency overlap between the request and a candidate text. Longer
/// candidates are dampened so boilerplate-heavy rows do not dominate.
pub fn score(query_tokens: &[String], text: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens = tokenize(text);
    if text_tokens.is_empty() {
        return 0.0;
    }
    let hits: usize = query_tokens
        .iter()
        .map(|q| text_tokens.iter().filter(|t| *t == q).count())
        .sum();
    hits as f64 / (1.0 + (text_tokens.len() as f64).ln())
}

/// Indices of the `top_k` rows most relevant to the request, scanning at most
/// `cap` rows. Falls back to leading rows when the request shares no tokens.
pub fn rank_rows(query: &str, frame: &Frame, cap: usize, top_k: usize) -> Vec<usize> {
    let query_tokens = tokenize(query);
    let scanned = frame.row_count().min(cap);
    let mut scored: Vec<(usize, f64)> = (0..scanned)
        .into_par_iter()
        .map(|i| (i, score(&query_tokens, &frame.row_text(i))))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.into_iter().take(top_k).map(|(i, _)| i).collect()
}

pub fn rank_values(query: &str, values: &[String], top_k: usize) -> Vec<String> {
    let query_tokens = tokenize(query);
    let mut scored: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .map(|(i, v)| (i, score(&query_tokens, v)))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored
        .into_iter()
        .take(top_k)
        .map(|(i, _)| values[i].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_mixed_text() {
        assert_eq!(tokenize("North-2024 sales"), ["north", "2024", "sales"]);
    }

    #[test]
    fn matching_values_rank_first() {
        let values = vec![
            "East".to_string(),
            "North".to_string(),
            "South".to_string(),
        ];
        let ranked = rank_values("total for North region", &values, 2);
        assert_eq!(ranked[0], "North");
    }

    #[test]
    fn empty_query_keeps_original_order() {
        let values = vec!["a".to_string(), "b".to_string()];
        assert_eq!(rank_values("", &values, 2), values);
    }
}
