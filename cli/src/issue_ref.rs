//! Parses the `owner/repo#issue` coordinate every command that addresses a
//! single issue accepts on the command line.
use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct IssueRef {
    pub owner: String,
    pub repo: String,
    pub issue: u64,
}

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.issue)
    }
}

impl std::str::FromStr for IssueRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (owner_repo, issue) = s
            .rsplit_once('#')
            .ok_or_else(|| anyhow::anyhow!("expected owner/repo#issue, got '{s}'"))?;
        let (owner, repo) = owner_repo
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("expected owner/repo#issue, got '{s}'"))?;
        if owner.is_empty() || repo.is_empty() {
            bail!("owner and repo must be non-empty in '{s}'");
        }
        let issue: u64 = issue.parse().map_err(|_| anyhow::anyhow!("invalid issue number in '{s}'"))?;
        Ok(IssueRef { owner: owner.to_string(), repo: repo.to_string(), issue })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_ref() {
        let parsed: IssueRef = "acme/widgets#42".parse().unwrap();
        assert_eq!(parsed.owner, "acme");
        assert_eq!(parsed.repo, "widgets");
        assert_eq!(parsed.issue, 42);
    }

    #[test]
    fn rejects_missing_hash() {
        assert!("acme/widgets".parse::<IssueRef>().is_err());
    }

    #[test]
    fn rejects_missing_slash() {
        assert!("widgets#42".parse::<IssueRef>().is_err());
    }

    #[test]
    fn round_trips_through_display() {
        let r = IssueRef { owner: "acme".into(), repo: "widgets".into(), issue: 7 };
        assert_eq!(r.to_string(), "acme/widgets#7");
    }
}
