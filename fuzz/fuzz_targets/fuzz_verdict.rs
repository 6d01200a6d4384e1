// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (C) 2025 Jonathan D.A. Jewell

#![no_main]

use libfuzzer_sys::fuzz_target;
use verdict_scorer::{parse_verdict, rule_on, Verdict};

fuzz_target!(|data: &[u8]| {
    if let Ok(reply) = std::str::from_utf8(data) {
        let outcome = parse_verdict(reply);
        if outcome.is_fallback() {
            assert_eq!(outcome.verdict(), Verdict::fallback());
        }
        let _ = rule_on(reply, reply);
    }
});
