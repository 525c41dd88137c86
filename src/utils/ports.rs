use std::cmp::Ordering;

/// Split a port name into its non-numeric prefix and optional trailing number.
///
/// `"COM10"` becomes `("COM", Some(10))`, `"COM"` becomes `("COM", None)`.
/// Suffixes that overflow `u64` are treated as part of the prefix.
pub fn split_port_name(name: &str) -> (&str, Option<u64>) {
    let digits = name
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return (name, None);
    }
    let (prefix, suffix) = name.split_at(name.len() - digits);
    match suffix.parse::<u64>() {
        Ok(n) => (prefix, Some(n)),
        Err(_) => (name, None),
    }
}

/// Total order used for displaying ports: case-insensitive prefix, then
/// numeric suffix ascending with "no suffix" first.
pub fn compare_port_names(a: &str, b: &str) -> Ordering {
    let (prefix_a, num_a) = split_port_name(a);
    let (prefix_b, num_b) = split_port_name(b);
    prefix_a
        .to_lowercase()
        .cmp(&prefix_b.to_lowercase())
        .then_with(|| num_a.cmp(&num_b))
        // Keep the order total for names differing only by case.
        .then_with(|| a.cmp(b))
}

/// Sort and dedup a raw driver listing.
pub fn sort_port_names(mut names: Vec<String>) -> Vec<String> {
    names.sort_by(|a, b| compare_port_names(a, b));
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn numeric_suffix_orders_naturally() {
        let sorted = sort_port_names(owned(&["COM10", "COM2", "COM"]));
        assert_eq!(sorted, owned(&["COM", "COM2", "COM10"]));
    }

    #[test]
    fn prefix_comparison_ignores_case() {
        let sorted = sort_port_names(owned(&["ttyUSB1", "TTYACM0", "ttyusb0"]));
        assert_eq!(sorted, owned(&["TTYACM0", "ttyusb0", "ttyUSB1"]));
    }

    #[test]
    fn split_handles_paths_and_plain_names() {
        assert_eq!(split_port_name("/dev/ttyS12"), ("/dev/ttyS", Some(12)));
        assert_eq!(split_port_name("COM"), ("COM", None));
        assert_eq!(split_port_name("42"), ("", Some(42)));
    }

    #[test]
    fn duplicates_are_removed() {
        let sorted = sort_port_names(owned(&["COM1", "COM1", "COM3"]));
        assert_eq!(sorted, owned(&["COM1", "COM3"]));
    }
}
