//! Parsing of `SHOW TABLE STATUS` batch output.

/// Zero-based position of `Data_length` in `SHOW TABLE STATUS`.
pub const DATA_LENGTH_COLUMN: usize = 6;

/// Sum `Data_length` over the tab-separated rows, skipping the header.
///
/// Rows without a numeric value (views report `NULL`) count as zero.
pub fn sum_data_length(output: &str) -> u64 {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split('\t').nth(DATA_LENGTH_COLUMN))
        .filter_map(|value| value.trim().parse::<u64>().ok())
        .sum()
}
