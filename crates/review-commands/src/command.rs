//! Command grammar (§6) and its parser: a chat message's text in, a typed
//! [`Command`] or a single-line usage error out.

use chrono::{Duration, NaiveDate};

use crate::{date, duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaKind {
    Review,
    Fixes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Subscribe { repo: String, force: bool },
    Unsubscribe { repo: String },
    Reviewers { users: Option<Vec<String>> },
    LabelReviewers { label: Option<String>, users: Vec<String> },
    AssignCount { n: i32 },
    Vacation { user: String },
    Actions { user: Option<String> },
    SendDigest,
    DailyDigest { offset_hours: Option<i32> },
    GetMrInfo { path: String, iid: i64 },
    Sla { set: Option<(SlaKind, Duration)> },
    Holidays { remove: bool, dates: Vec<NaiveDate> },
    AddBlockLabel { label: String, color: Option<String> },
    AddReleaseLabel { label: String, color: Option<String> },
    AddReleaseReadyLabel { label: String },
    AddFeatureReleaseTag { label: String },
    AddJiraPrefix { prefix: String },
    EnsureLabel { label: String, color: String },
    AutoReleaseBranch { config: Option<(String, String)> },
    ReleaseManagers { users: Option<Vec<String>> },
    ReleaseSubscribe { repo: String },
    ReleaseUnsubscribe { repo: String },
    SpawnBranch { repo: String, title: Option<String> },
    TrackDeploy { job_url: String, repo: String },
    UntrackDeploy { repo: String },
}

fn csv(arg: &str) -> Vec<String> {
    arg.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn require<'a>(args: &'a [&str], n: usize, usage: &str) -> Result<&'a [&'a str], String> {
    if args.len() < n {
        Err(format!("usage: {usage}"))
    } else {
        Ok(args)
    }
}

/// Parses one chat message's text, e.g. `/subscribe org/widgets --force`.
pub fn parse(text: &str) -> Result<Command, String> {
    let mut parts = text.trim().split_whitespace();
    let name = parts.next().ok_or_else(|| "empty command".to_string())?.trim_start_matches('/').to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();

    match name.as_str() {
        "subscribe" => {
            require(&args, 1, "/subscribe <repo> [--force]")?;
            Ok(Command::Subscribe { repo: args[0].to_string(), force: args.contains(&"--force") })
        }
        "unsubscribe" => {
            require(&args, 1, "/unsubscribe <repo>")?;
            Ok(Command::Unsubscribe { repo: args[0].to_string() })
        }
        "reviewers" => Ok(Command::Reviewers { users: args.first().map(|a| csv(a)) }),
        "label_reviewers" => {
            if args.is_empty() {
                return Ok(Command::LabelReviewers { label: None, users: vec![] });
            }
            let users = args.get(1).map(|a| csv(a)).unwrap_or_default();
            Ok(Command::LabelReviewers { label: Some(args[0].to_string()), users })
        }
        "assign_count" => {
            require(&args, 1, "/assign_count <N>")?;
            let n = args[0].parse().map_err(|_| "N must be an integer".to_string())?;
            Ok(Command::AssignCount { n })
        }
        "vacation" => {
            require(&args, 1, "/vacation <user>")?;
            Ok(Command::Vacation { user: args[0].to_string() })
        }
        "actions" => Ok(Command::Actions { user: args.first().map(|s| s.to_string()) }),
        "send_digest" => Ok(Command::SendDigest),
        "daily_digest" => {
            let offset_hours = match args.first() {
                None => None,
                Some(a) => Some(a.parse().map_err(|_| "offset must be a signed integer number of hours".to_string())?),
            };
            Ok(Command::DailyDigest { offset_hours })
        }
        "get_mr_info" => {
            require(&args, 1, "/get_mr_info <path!iid>")?;
            let (path, iid) = args[0].rsplit_once('!').ok_or_else(|| "expected <path!iid>".to_string())?;
            let iid = iid.parse().map_err(|_| "iid must be an integer".to_string())?;
            Ok(Command::GetMrInfo { path: path.to_string(), iid })
        }
        "sla" => {
            if args.is_empty() {
                return Ok(Command::Sla { set: None });
            }
            require(&args, 2, "/sla [review|fixes <duration>]")?;
            let kind = match args[0].to_ascii_lowercase().as_str() {
                "review" => SlaKind::Review,
                "fixes" => SlaKind::Fixes,
                other => return Err(format!("unknown SLA kind: {other}")),
            };
            let duration = duration::parse(args[1]).ok_or_else(|| "duration must look like <int>(h|d|w)".to_string())?;
            Ok(Command::Sla { set: Some((kind, duration)) })
        }
        "holidays" => {
            let (remove, date_args) = match args.first() {
                Some(&"remove") => (true, &args[1..]),
                _ => (false, &args[..]),
            };
            let mut dates = Vec::with_capacity(date_args.len());
            for a in date_args {
                dates.push(date::parse(a).ok_or_else(|| format!("bad date: {a} (expected DD.MM.YYYY)"))?);
            }
            Ok(Command::Holidays { remove, dates })
        }
        "add_block_label" => {
            require(&args, 1, "/add_block_label <label> [#color]")?;
            Ok(Command::AddBlockLabel { label: args[0].to_string(), color: args.get(1).map(|s| s.to_string()) })
        }
        "add_release_label" => {
            require(&args, 1, "/add_release_label <label> [#color]")?;
            Ok(Command::AddReleaseLabel { label: args[0].to_string(), color: args.get(1).map(|s| s.to_string()) })
        }
        "add_release_ready_label" => {
            require(&args, 1, "/add_release_ready_label <label>")?;
            Ok(Command::AddReleaseReadyLabel { label: args[0].to_string() })
        }
        "add_feature_release_tag" => {
            require(&args, 1, "/add_feature_release_tag <label>")?;
            Ok(Command::AddFeatureReleaseTag { label: args[0].to_string() })
        }
        "add_jira_prefix" => {
            require(&args, 1, "/add_jira_prefix <PFX>")?;
            Ok(Command::AddJiraPrefix { prefix: args[0].to_ascii_uppercase() })
        }
        "ensure_label" => {
            require(&args, 2, "/ensure_label <label> <#color>")?;
            Ok(Command::EnsureLabel { label: args[0].to_string(), color: args[1].to_string() })
        }
        "auto_release_branch" => {
            if args.is_empty() {
                return Ok(Command::AutoReleaseBranch { config: None });
            }
            let joined = args.join(" ");
            let (prefix, dev_branch) = joined.split_once(':').ok_or_else(|| "expected <prefix> : <dev-branch>".to_string())?;
            Ok(Command::AutoReleaseBranch { config: Some((prefix.trim().to_string(), dev_branch.trim().to_string())) })
        }
        "release_managers" => Ok(Command::ReleaseManagers { users: args.first().map(|a| csv(a)) }),
        "release_subscribe" => {
            require(&args, 1, "/release_subscribe <repo>")?;
            Ok(Command::ReleaseSubscribe { repo: args[0].to_string() })
        }
        "release_unsubscribe" => {
            require(&args, 1, "/release_unsubscribe <repo>")?;
            Ok(Command::ReleaseUnsubscribe { repo: args[0].to_string() })
        }
        "spawn_branch" => {
            require(&args, 1, "/spawn_branch <repo> [title]")?;
            let title = if args.len() > 1 { Some(args[1..].join(" ")) } else { None };
            Ok(Command::SpawnBranch { repo: args[0].to_string(), title })
        }
        "track_deploy" => {
            require(&args, 2, "/track_deploy <job-url> <repo>")?;
            Ok(Command::TrackDeploy { job_url: args[0].to_string(), repo: args[1].to_string() })
        }
        "untrack_deploy" => {
            require(&args, 1, "/untrack_deploy <repo>")?;
            Ok(Command::UntrackDeploy { repo: args[0].to_string() })
        }
        other => Err(format!("unknown command: /{other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_with_force_flag() {
        assert_eq!(parse("/subscribe org/widgets --force").unwrap(), Command::Subscribe { repo: "org/widgets".into(), force: true });
    }

    #[test]
    fn parses_get_mr_info_path_and_iid() {
        assert_eq!(parse("/get_mr_info org/widgets!42").unwrap(), Command::GetMrInfo { path: "org/widgets".into(), iid: 42 });
    }

    #[test]
    fn parses_sla_with_no_args_as_a_query() {
        assert_eq!(parse("/sla").unwrap(), Command::Sla { set: None });
    }

    #[test]
    fn parses_sla_set() {
        let Command::Sla { set: Some((kind, duration)) } = parse("/sla review 8h").unwrap() else { panic!("expected Sla::set") };
        assert_eq!(kind, SlaKind::Review);
        assert_eq!(duration, Duration::hours(8));
    }

    #[test]
    fn parses_holidays_remove() {
        assert_eq!(
            parse("/holidays remove 01.01.2024").unwrap(),
            Command::Holidays { remove: true, dates: vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()] }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(parse("/nope").is_err());
    }

    #[test]
    fn rejects_missing_required_args() {
        assert!(parse("/subscribe").is_err());
    }
}
