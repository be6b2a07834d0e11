//! Positioning log (.pos) parser
//!
//! Format: one fix per line, whitespace-delimited. Lines starting with `%`
//! are header/comment lines. A data line carries at least 12 tokens; the
//! columns of interest sit at fixed offsets:
//!
//! | offset | field |
//! |--------|-------|
//! | 2 | latitude |
//! | 3 | longitude |
//! | 4 | height |
//! | 5 | quality indicator (Q) |
//! | 6 | satellite count (ns) |
//! | 7 | std dev north (sdn) |
//! | 8 | std dev east (sde) |

use crate::domain::types::RawPositionRecord;

pub const COMMENT_MARKER: char = '%';
pub const MIN_TOKENS: usize = 12;

/// Parse a whole positioning log. Comment lines and short lines are skipped.
pub fn parse_position_log(text: &str) -> Vec<RawPositionRecord> {
    text.lines().filter_map(parse_position_line).collect()
}

/// Parse a single line, `None` for comments and lines with too few tokens
pub fn parse_position_line(line: &str) -> Option<RawPositionRecord> {
    if line.starts_with(COMMENT_MARKER) {
        return None;
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < MIN_TOKENS {
        return None;
    }

    Some(RawPositionRecord {
        latitude: tokens[2].to_string(),
        longitude: tokens[3].to_string(),
        height: tokens[4].to_string(),
        quality: tokens[5].to_string(),
        satellite_count: tokens[6].to_string(),
        sd_north: tokens[7].to_string(),
        sd_east: tokens[8].to_string(),
    })
}
