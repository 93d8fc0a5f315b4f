//! Common utility functions

/// Mask a secret for logging: first and last four characters survive when
/// the value is long enough, otherwise everything is hidden.
pub fn mask_sensitive(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_multibyte() {
        assert_eq!(mask_sensitive("ééééééééé"), "éééé***éééé");
    }
}
