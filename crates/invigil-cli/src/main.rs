use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use invigil_core::proctor::Question;

#[derive(Parser)]
#[command(name = "invigil", about = "Invigil proctoring and enrollment CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk through the three-pose face enrollment
    Enroll {
        /// User id to enroll
        user: String,
    },
    /// Capture and verify attendance
    Attend {
        /// User id marking attendance
        user: String,
        /// Session id; omit for the daily variant
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Take a proctored quiz from a question file
    Quiz {
        /// User id taking the quiz
        user: String,
        /// Quiz id
        quiz_id: String,
        /// Path to a JSON array of questions
        file: String,
        /// Duration in seconds
        #[arg(short, long, default_value_t = 600)]
        duration: u32,
    },
    /// Generate feedback questions for a subject
    Feedback {
        /// Subject name
        subject: String,
    },
    /// Scan the classroom against a roster file
    Scan {
        /// Path to a JSON array of roster entries
        roster: String,
    },
    /// Show daemon status
    Status,
}

// `#[zbus::proxy]` generates the async `InvigilProxy` used below.
#[zbus::proxy(
    interface = "org.academicverse.Invigil1",
    default_service = "org.academicverse.Invigil1",
    default_path = "/org/academicverse/Invigil1"
)]
trait Invigil {
    async fn enroll_start(&self, user: &str) -> zbus::Result<String>;
    async fn enroll_capture(&self, user: &str) -> zbus::Result<String>;
    async fn enroll_advance(&self, user: &str) -> zbus::Result<String>;
    async fn enroll_save(&self, user: &str) -> zbus::Result<String>;
    async fn enroll_cancel(&self, user: &str) -> zbus::Result<bool>;
    async fn attend(&self, user: &str, session: &str) -> zbus::Result<String>;
    async fn quiz_start(
        &self,
        user: &str,
        quiz_id: &str,
        questions_json: &str,
        duration_secs: u32,
    ) -> zbus::Result<String>;
    async fn quiz_answer(&self, user: &str, question: u32, choice: u32) -> zbus::Result<()>;
    async fn quiz_status(&self, user: &str) -> zbus::Result<String>;
    async fn quiz_submit(&self, user: &str) -> zbus::Result<String>;
    async fn scan_classroom(&self, roster_json: &str) -> zbus::Result<String>;
    async fn feedback_questions(&self, subject: &str) -> zbus::Result<Vec<String>>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus — is invigild running?")?;
    let proxy = InvigilProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll { user } => run_enroll(&proxy, &user).await?,
        Commands::Attend { user, session } => {
            let reply = proxy
                .attend(&user, session.as_deref().unwrap_or(""))
                .await?;
            let reply: serde_json::Value = serde_json::from_str(&reply)?;
            if reply["marked"].as_bool().unwrap_or(false) {
                println!(
                    "Attendance marked (confidence {:.2})",
                    reply["confidence"].as_f64().unwrap_or(0.0)
                );
            } else {
                println!("Not marked: {}", reply["reason"].as_str().unwrap_or("unknown"));
            }
        }
        Commands::Quiz {
            user,
            quiz_id,
            file,
            duration,
        } => run_quiz(&proxy, &user, &quiz_id, &file, duration).await?,
        Commands::Feedback { subject } => {
            for (i, q) in proxy.feedback_questions(&subject).await?.iter().enumerate() {
                println!("{}. {q}", i + 1);
            }
        }
        Commands::Scan { roster } => {
            let roster_json = std::fs::read_to_string(&roster)
                .with_context(|| format!("reading roster file {roster}"))?;
            let ids = proxy.scan_classroom(&roster_json).await?;
            let ids: Vec<String> = serde_json::from_str(&ids)?;
            if ids.is_empty() {
                println!("No students identified");
            } else {
                println!("Identified: {}", ids.join(", "));
            }
        }
        Commands::Status => {
            println!("{}", proxy.status().await?);
        }
    }

    Ok(())
}

/// Interactive enrollment: capture each pose, user-gated advance, save.
async fn run_enroll(proxy: &InvigilProxy<'_>, user: &str) -> Result<()> {
    let started: serde_json::Value = serde_json::from_str(&proxy.enroll_start(user).await?)?;
    if started["already_enrolled"].as_bool() == Some(true) {
        println!("An enrollment already exists; completing this run overwrites it.");
    }
    let mut label = started["label"].as_str().unwrap_or("").to_string();

    loop {
        prompt(&format!("Next pose: {label}. Press Enter to capture"))?;
        let outcome: serde_json::Value = serde_json::from_str(&proxy.enroll_capture(user).await?)?;
        if !outcome["accepted"].as_bool().unwrap_or(false) {
            println!(
                "Rejected: {}.",
                outcome["reason"].as_str().unwrap_or("unknown")
            );
            let answer = prompt("Press Enter to retry, or type q to cancel")?;
            if answer.trim().eq_ignore_ascii_case("q") {
                proxy.enroll_cancel(user).await?;
                println!("Enrollment cancelled; no images were kept.");
                return Ok(());
            }
            continue;
        }
        if outcome["complete"].as_bool().unwrap_or(false) {
            break;
        }
        prompt("Captured. Press Enter for the next pose")?;
        let next: serde_json::Value = serde_json::from_str(&proxy.enroll_advance(user).await?)?;
        label = next["label"].as_str().unwrap_or("").to_string();
    }

    proxy.enroll_save(user).await?;
    println!("Enrollment saved.");
    Ok(())
}

/// Take a quiz: one answer per question, then submit.
async fn run_quiz(
    proxy: &InvigilProxy<'_>,
    user: &str,
    quiz_id: &str,
    file: &str,
    duration: u32,
) -> Result<()> {
    let questions_json =
        std::fs::read_to_string(file).with_context(|| format!("reading question file {file}"))?;
    let questions: Vec<Question> = serde_json::from_str(&questions_json)?;
    if questions.is_empty() {
        bail!("question file is empty");
    }

    proxy
        .quiz_start(user, quiz_id, &questions_json, duration)
        .await?;
    println!("Quiz started: {} questions, {duration}s", questions.len());

    for (i, q) in questions.iter().enumerate() {
        let status: serde_json::Value = serde_json::from_str(&proxy.quiz_status(user).await?)?;
        println!(
            "\n[{}s remaining]  {}. {}",
            status["remaining_secs"].as_u64().unwrap_or(0),
            i + 1,
            q.prompt
        );
        for (c, choice) in q.choices.iter().enumerate() {
            println!("   {c}) {choice}");
        }
        let answer = prompt("Answer")?;
        match answer.trim().parse::<u32>() {
            Ok(choice) => proxy.quiz_answer(user, i as u32, choice).await?,
            Err(_) => println!("Skipped."),
        }
    }

    let submitted: serde_json::Value = serde_json::from_str(&proxy.quiz_submit(user).await?)?;
    println!("\nSubmitted.");
    if let Some(analysis) = submitted.get("analysis").filter(|a| !a.is_null()) {
        println!("Behavior analysis: {analysis}");
    }
    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}
