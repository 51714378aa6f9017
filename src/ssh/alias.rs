//! Host aliases from an OpenSSH-style config file.
//!
//! Only the directives that affect where and as whom we connect are read:
//! `Host`, `Hostname`, `Port`, `User` and `IdentityFile`. Keywords are
//! case-insensitive and may be separated from their value by whitespace or
//! `=`. Anything else is ignored.
//!
//! Host patterns match case-insensitively, literal or wildcard alike. Lookup
//! prefers an exact pattern match. Otherwise the matching wildcard pattern
//! with the highest specificity wins, where specificity is the pattern length
//! minus its wildcard characters. Equal scores go to the pattern declared
//! first.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::config::expand_tilde;
use super::error::SshError;
use super::known_hosts::glob_match;
use super::types::{DEFAULT_SSH_PORT, HostInfo};

/// One `Host` pattern and the settings declared under it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasRule {
    pub pattern: String,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_files: Vec<PathBuf>,
}

impl AliasRule {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            ..Default::default()
        }
    }

    fn is_wildcard(&self) -> bool {
        self.pattern.contains(['*', '?'])
    }

    /// Literal characters in the pattern. A lone `*` scores 0.
    pub fn specificity(&self) -> usize {
        self.pattern.chars().filter(|c| *c != '*' && *c != '?').count()
    }

    /// Without wildcards this is a case-insensitive equality test.
    fn matches(&self, host: &str) -> bool {
        glob_match(&self.pattern, host)
    }
}

/// A host after alias substitution, plus the identity files the alias contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub host_info: HostInfo,
    pub identity_files: Vec<PathBuf>,
}

/// All alias rules from one file, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    rules: Vec<AliasRule>,
}

impl AliasTable {
    /// Read and parse an alias file. A missing file gives an empty table.
    pub fn load(path: &Path) -> Result<Self, SshError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No alias file at {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(SshError::Io(e)),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut table = Self::default();
        // Indexes of the rules the current `Host` line opened
        let mut current: Vec<usize> = Vec::new();

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((keyword, value)) = split_directive(line) else {
                continue;
            };

            if keyword.eq_ignore_ascii_case("host") {
                current = value
                    .split_whitespace()
                    .map(|pattern| table.open_rule(unquote(pattern)))
                    .collect();
                continue;
            }

            let value = unquote(value);
            for &index in &current {
                let rule = &mut table.rules[index];
                match keyword.to_ascii_lowercase().as_str() {
                    "hostname" => rule.hostname = Some(value.to_string()),
                    "user" => rule.user = Some(value.to_string()),
                    "port" => match value.parse::<u16>() {
                        Ok(port) if port > 0 => rule.port = Some(port),
                        _ => debug!("Ignoring invalid port {:?} for {}", value, rule.pattern),
                    },
                    "identityfile" => rule.identity_files.push(expand_tilde(value)),
                    _ => {}
                }
            }
        }

        table
    }

    /// Start a fresh rule for `pattern`, replacing an earlier one in place.
    fn open_rule(&mut self, pattern: &str) -> usize {
        let key = pattern.to_lowercase();
        match self.rules.iter().position(|r| r.pattern.to_lowercase() == key) {
            Some(index) => {
                self.rules[index] = AliasRule::new(pattern);
                index
            }
            None => {
                self.rules.push(AliasRule::new(pattern));
                self.rules.len() - 1
            }
        }
    }

    pub fn rules(&self) -> &[AliasRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the rule that applies to `host`.
    pub fn lookup(&self, host: &str) -> Option<&AliasRule> {
        if let Some(exact) = self
            .rules
            .iter()
            .find(|r| !r.is_wildcard() && r.matches(host))
        {
            return Some(exact);
        }

        let mut best: Option<&AliasRule> = None;
        for rule in self.rules.iter().filter(|r| r.matches(host)) {
            match best {
                Some(current) if current.specificity() >= rule.specificity() => {}
                _ => best = Some(rule),
            }
        }
        best
    }

    /// Apply the matching rule to `info`.
    ///
    /// The hostname is always replaced when the rule sets one. Port and user
    /// are replaced only while still at their defaults (22 and empty).
    pub fn resolve(&self, info: &HostInfo) -> ResolvedHost {
        let Some(rule) = self.lookup(&info.host) else {
            return ResolvedHost {
                host_info: info.clone(),
                identity_files: Vec::new(),
            };
        };

        let mut host_info = info.clone();
        if let Some(hostname) = rule.hostname.as_deref().filter(|h| !h.is_empty()) {
            host_info.host = hostname.to_string();
        }
        if host_info.port == DEFAULT_SSH_PORT
            && let Some(port) = rule.port
        {
            host_info.port = port;
        }
        if host_info.user.is_empty()
            && let Some(user) = rule.user.as_deref()
        {
            host_info.user = user.to_string();
        }

        debug!(
            "Alias {:?} resolved {} to {}",
            rule.pattern, info.host, host_info
        );

        ResolvedHost {
            host_info,
            identity_files: rule.identity_files.clone(),
        }
    }
}

/// Split `Keyword value`, `Keyword=value` or `Keyword = value`.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let (keyword, rest) = line.split_once(|c: char| c.is_whitespace() || c == '=')?;
    let value = rest.trim_start();
    let value = value.strip_prefix('=').unwrap_or(value).trim();
    if keyword.is_empty() || value.is_empty() {
        return None;
    }
    Some((keyword, value))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# Personal hosts
Host web1
    Hostname 10.0.0.5
    User deploy
    Port 2222
    IdentityFile /keys/web1

Host *.prod.example.com
    User produser
    IdentityFile /keys/prod

Host *
    User fallback
    Port 2200
"#;

    mod parsing {
        use super::*;

        #[test]
        fn test_parse_blocks() {
            let table = AliasTable::parse(SAMPLE);
            assert_eq!(table.rules().len(), 3);

            let web1 = &table.rules()[0];
            assert_eq!(web1.pattern, "web1");
            assert_eq!(web1.hostname.as_deref(), Some("10.0.0.5"));
            assert_eq!(web1.user.as_deref(), Some("deploy"));
            assert_eq!(web1.port, Some(2222));
            assert_eq!(web1.identity_files, vec![PathBuf::from("/keys/web1")]);
        }

        #[test]
        fn test_keywords_case_insensitive_and_equals_syntax() {
            let table = AliasTable::parse("HOST box\n  HOSTNAME=1.2.3.4\n  user = root\n  port=2022\n");
            let rule = table.lookup("box").unwrap();
            assert_eq!(rule.hostname.as_deref(), Some("1.2.3.4"));
            assert_eq!(rule.user.as_deref(), Some("root"));
            assert_eq!(rule.port, Some(2022));
        }

        #[test]
        fn test_unknown_directives_and_orphans_ignored() {
            let content = "User nobody\nHost a\n  ForwardAgent yes\n  ProxyJump bastion\n  Hostname real-a\n";
            let table = AliasTable::parse(content);
            assert_eq!(table.rules().len(), 1);
            assert_eq!(table.rules()[0].hostname.as_deref(), Some("real-a"));
            assert_eq!(table.rules()[0].user, None);
        }

        #[test]
        fn test_multiple_patterns_share_settings() {
            let table = AliasTable::parse("Host alpha beta\n  User ops\n");
            assert_eq!(table.lookup("alpha").unwrap().user.as_deref(), Some("ops"));
            assert_eq!(table.lookup("beta").unwrap().user.as_deref(), Some("ops"));
        }

        #[test]
        fn test_invalid_port_ignored() {
            let table = AliasTable::parse("Host a\n  Port ssh\nHost b\n  Port 0\n");
            assert_eq!(table.lookup("a").unwrap().port, None);
            assert_eq!(table.lookup("b").unwrap().port, None);
        }

        #[test]
        fn test_identity_files_accumulate_and_expand_tilde() {
            let table = AliasTable::parse("Host a\n  IdentityFile ~/.ssh/one\n  IdentityFile \"/two\"\n");
            let files = &table.lookup("a").unwrap().identity_files;
            assert_eq!(files.len(), 2);
            assert_eq!(files[1], PathBuf::from("/two"));
            if let Some(home) = dirs::home_dir() {
                assert_eq!(files[0], home.join(".ssh/one"));
            }
        }

        #[test]
        fn test_later_duplicate_replaces_earlier() {
            let table = AliasTable::parse("Host a\n  User first\nHost a\n  Hostname second\n");
            assert_eq!(table.rules().len(), 1);
            let rule = table.lookup("a").unwrap();
            assert_eq!(rule.hostname.as_deref(), Some("second"));
            assert_eq!(rule.user, None);

            let table = AliasTable::parse("Host a\n  User first\nHost A\n  User second\n");
            assert_eq!(table.rules().len(), 1);
            assert_eq!(table.lookup("a").unwrap().user.as_deref(), Some("second"));
        }

        #[test]
        fn test_missing_file_is_empty_table() {
            let dir = tempfile::tempdir().unwrap();
            let table = AliasTable::load(&dir.path().join("config")).unwrap();
            assert!(table.is_empty());
        }

        #[test]
        fn test_load_from_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config");
            fs::write(&path, SAMPLE).unwrap();
            let table = AliasTable::load(&path).unwrap();
            assert_eq!(table.rules().len(), 3);
        }
    }

    mod lookup {
        use super::*;

        #[test]
        fn test_exact_match_beats_wildcards() {
            let table = AliasTable::parse("Host web*\n  User wild\nHost web1\n  User exact\n");
            assert_eq!(table.lookup("web1").unwrap().user.as_deref(), Some("exact"));
        }

        #[test]
        fn test_matching_ignores_case() {
            let table = AliasTable::parse("Host Web1\n  User exact\nHost *.LAN\n  User wild\n");
            assert_eq!(table.lookup("web1").unwrap().user.as_deref(), Some("exact"));
            assert_eq!(table.lookup("WEB1").unwrap().user.as_deref(), Some("exact"));
            assert_eq!(table.lookup("nas.lan").unwrap().user.as_deref(), Some("wild"));
        }

        #[test]
        fn test_most_specific_wildcard_wins() {
            let table = AliasTable::parse(SAMPLE);
            let rule = table.lookup("db1.prod.example.com").unwrap();
            assert_eq!(rule.pattern, "*.prod.example.com");
        }

        #[test]
        fn test_catch_all_is_last_resort() {
            let table = AliasTable::parse(SAMPLE);
            assert_eq!(table.lookup("anything").unwrap().pattern, "*");
        }

        #[test]
        fn test_prefix_and_suffix_wildcards() {
            let table = AliasTable::parse("Host server*\n  User pre\nHost *.lan\n  User suf\n");
            assert_eq!(table.lookup("server42").unwrap().user.as_deref(), Some("pre"));
            assert_eq!(table.lookup("nas.lan").unwrap().user.as_deref(), Some("suf"));
            assert!(table.lookup("desktop").is_none());
        }

        #[test]
        fn test_tie_goes_to_first_declared() {
            let table = AliasTable::parse("Host ab*\n  User first\nHost *ab\n  User second\n");
            // "abab" matches both, each with specificity 2
            assert_eq!(table.lookup("abab").unwrap().user.as_deref(), Some("first"));
        }

        #[test]
        fn test_specificity_scores() {
            assert_eq!(AliasRule::new("*").specificity(), 0);
            assert_eq!(AliasRule::new("*.prod.example.com").specificity(), 17);
            assert_eq!(AliasRule::new("web?").specificity(), 3);
        }

        #[test]
        fn test_no_rules_no_match() {
            assert!(AliasTable::default().lookup("host").is_none());
        }
    }

    mod merge {
        use super::*;

        #[test]
        fn test_defaults_take_alias_values() {
            let table = AliasTable::parse(SAMPLE);
            let resolved = table.resolve(&HostInfo::new("web1", 22, ""));
            assert_eq!(resolved.host_info, HostInfo::new("10.0.0.5", 2222, "deploy"));
            assert_eq!(resolved.identity_files, vec![PathBuf::from("/keys/web1")]);
        }

        #[test]
        fn test_explicit_port_and_user_win() {
            let table = AliasTable::parse(SAMPLE);
            let resolved = table.resolve(&HostInfo::new("web1", 2022, "admin"));
            assert_eq!(resolved.host_info, HostInfo::new("10.0.0.5", 2022, "admin"));
        }

        #[test]
        fn test_hostname_always_substituted() {
            let table = AliasTable::parse("Host db\n  Hostname db.internal\n");
            let resolved = table.resolve(&HostInfo::new("db", 5022, "me"));
            assert_eq!(resolved.host_info.host, "db.internal");
            assert_eq!(resolved.host_info.port, 5022);
            assert_eq!(resolved.host_info.user, "me");
        }

        #[test]
        fn test_rule_without_hostname_keeps_host() {
            let table = AliasTable::parse(SAMPLE);
            let resolved = table.resolve(&HostInfo::new("db1.prod.example.com", 22, ""));
            assert_eq!(resolved.host_info.host, "db1.prod.example.com");
            assert_eq!(resolved.host_info.user, "produser");
            assert_eq!(resolved.host_info.port, 22);
        }

        #[test]
        fn test_no_match_returns_input() {
            let table = AliasTable::parse("Host other\n  User x\n");
            let info = HostInfo::new("mine", 22, "");
            let resolved = table.resolve(&info);
            assert_eq!(resolved.host_info, info);
            assert!(resolved.identity_files.is_empty());
        }
    }
}
