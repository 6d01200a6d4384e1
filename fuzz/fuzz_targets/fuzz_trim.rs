// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (C) 2025 Jonathan D.A. Jewell

#![no_main]

use case_source::trim_sentences;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let trimmed = trim_sentences(text, 3);
        assert!(trimmed.len() <= text.len());
        assert_eq!(trimmed, trimmed.trim());
    }
});
