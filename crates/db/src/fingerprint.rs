/// Take the first 10 chars of the md5 checksum as the query fingerprint.
/// Fingerprints are scoped per database, and obfuscated queries that only
/// differ in literal shapes (ex. the number of values in an IN list)
/// collapse to the same checksum.
pub fn fingerprint_query(query: &str) -> String {
    let checksum = md5::compute(query.as_bytes());
    hex::encode(checksum.as_ref())[0..10].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_are_ten_hex_chars() {
        let fingerprint = fingerprint_query("select * from users where id = ?");
        assert_eq!(fingerprint.len(), 10);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn equal_queries_share_a_fingerprint() {
        assert_eq!(fingerprint_query("select 1"), fingerprint_query("select 1"));
        assert_ne!(fingerprint_query("select 1"), fingerprint_query("select 2"));
    }

    #[test]
    fn queries_differing_only_in_literals_share_a_fingerprint() {
        let obfuscator = crate::obfuscate::Obfuscator::new();
        let clean = crate::clean::clean_query;

        let fingerprint = |query: &str| {
            fingerprint_query(&clean(&obfuscator.obfuscate_query(query)))
        };

        assert_eq!(
            fingerprint("SELECT * FROM t WHERE a=1"),
            fingerprint("SELECT * FROM t WHERE a=2")
        );
        assert_eq!(
            fingerprint("SELECT * FROM t WHERE id IN (1,2,3)"),
            fingerprint("SELECT * FROM t WHERE id IN (4,5)")
        );
        assert_ne!(
            fingerprint("SELECT * FROM t WHERE a=1"),
            fingerprint("SELECT * FROM t WHERE b=1")
        );
    }
}
