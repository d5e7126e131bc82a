//! `update.conf` editor
//!
//! Line-preserving model of the legacy engine's key=value file. The only
//! mutation is pointing `SERVER=` at a new update-check responder.

use std::fmt;

const SECTION_GENERAL: &str = "[General]";
const SERVER_KEY: &str = "SERVER=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConf {
    lines: Vec<String>,
}

impl UpdateConf {
    pub fn parse(contents: &str) -> Self {
        Self {
            lines: contents.split('\n').map(str::to_string).collect(),
        }
    }

    fn is_active_server(line: &str) -> bool {
        line.trim_start().starts_with(SERVER_KEY)
    }

    /// Comment out every active `SERVER=` line and insert `SERVER=<url>`
    /// right after `[General]`, or at the top when there is no header.
    /// Commented lines are left untouched.
    pub fn set_server(&mut self, url: &str) {
        let mut insert_at = 0;

        for (index, line) in self.lines.iter_mut().enumerate() {
            if line.starts_with(SECTION_GENERAL) {
                insert_at = index + 1;
            }
            if Self::is_active_server(line) {
                line.insert(0, '#');
            }
        }

        self.lines.insert(insert_at, format!("{}{}", SERVER_KEY, url));
    }

    /// URL of the active `SERVER=` line, if exactly one exists
    pub fn active_server(&self) -> Option<&str> {
        let mut active = self
            .lines
            .iter()
            .filter(|line| Self::is_active_server(line))
            .map(|line| &line.trim_start()[SERVER_KEY.len()..]);
        match (active.next(), active.next()) {
            (Some(url), None) => Some(url),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn active_server_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| Self::is_active_server(line))
            .count()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        find_value(self.lines.iter().map(String::as_str), key)
    }
}

impl fmt::Display for UpdateConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

/// Value of the first uncommented `key=value` line, without surrounding quotes
pub fn find_value<'a, I>(lines: I, key: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    lines.into_iter().find_map(|line| {
        let line = line.trim();
        let rest = line.strip_prefix(key)?.strip_prefix('=')?;
        Some(rest.trim().trim_matches('"'))
    })
}

/// [`find_value`] over a whole file
pub fn value_in<'a>(contents: &'a str, key: &str) -> Option<&'a str> {
    find_value(contents.lines(), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[General]\n\
        #REMARKABLE_RELEASE_APPID={98DA7DF2-4E3E-4744-9DE6-EC931886ABAB}\n\
        SERVER=https://updates.cloud.remarkable.engineering/service/update2\n\
        GROUP=Prod\n\
        PLATFORM=reMarkable2\n\
        REMARKABLE_RELEASE_VERSION=2.15.1.1189\n";

    #[test]
    fn test_set_server_after_general() {
        let mut conf = UpdateConf::parse(SAMPLE);
        conf.set_server("http://10.11.99.2:8085");

        let text = conf.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[General]");
        assert_eq!(lines[1], "SERVER=http://10.11.99.2:8085");
        assert!(text.contains(
            "\n#SERVER=https://updates.cloud.remarkable.engineering/service/update2\n"
        ));
        assert_eq!(conf.active_server(), Some("http://10.11.99.2:8085"));
    }

    #[test]
    fn test_set_server_without_header_inserts_first() {
        let mut conf = UpdateConf::parse("GROUP=Prod\nSERVER=http://old\n");
        conf.set_server("http://new");
        assert_eq!(
            conf.to_string(),
            "SERVER=http://new\nGROUP=Prod\n#SERVER=http://old\n"
        );
    }

    #[test]
    fn test_repeated_application_keeps_one_active_line() {
        let mut conf = UpdateConf::parse(SAMPLE);
        for _ in 0..4 {
            conf.set_server("http://10.11.99.2:8085");
            assert_eq!(conf.active_server_count(), 1);
        }

        let text = conf.to_string();
        // Original line commented once, each previous responder line once
        assert_eq!(
            text.matches("#SERVER=https://updates.cloud.remarkable.engineering")
                .count(),
            1
        );
        assert!(!text.contains("##"));
        assert_eq!(text.matches("#SERVER=http://10.11.99.2:8085").count(), 3);
    }

    #[test]
    fn test_commented_lines_untouched() {
        let mut conf = UpdateConf::parse("[General]\n#SERVER=http://a\n");
        conf.set_server("http://b");
        assert_eq!(conf.to_string(), "[General]\nSERVER=http://b\n#SERVER=http://a\n");
    }

    #[test]
    fn test_get_value() {
        let conf = UpdateConf::parse(SAMPLE);
        assert_eq!(conf.get("REMARKABLE_RELEASE_VERSION"), Some("2.15.1.1189"));
        assert_eq!(conf.get("REMARKABLE_RELEASE_APPID"), None);
        assert_eq!(
            value_in("NAME=\"Codex\"\nIMG_VERSION=\"3.20.0.92\"\n", "IMG_VERSION"),
            Some("3.20.0.92")
        );
    }
}
