use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::feedback::session::IllustrationOutput;
use crate::feedback::{FeedbackService, FeedbackSession, ImageRef};
use crate::utils::text::truncate_for_log;
use crate::utils::timing::start_turn_timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Question,
    NewPhoto,
    Quit,
    Illustrate,
}

impl MenuChoice {
    fn parse(input: &str, illustration_enabled: bool) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "1" | "a" | "ask" | "question" => Some(MenuChoice::Question),
            "2" | "n" | "new" => Some(MenuChoice::NewPhoto),
            "3" | "q" | "e" | "quit" | "exit" => Some(MenuChoice::Quit),
            "4" | "g" | "illustrate" if illustration_enabled => Some(MenuChoice::Illustrate),
            _ => None,
        }
    }
}

enum LoopState {
    AwaitingInitialInput,
    HasFeedback(FeedbackSession),
    Terminated,
}

struct Console<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn say(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Prints `label` and reads one line; `None` means the input is closed.
    async fn ask(&mut self, label: &str) -> Result<Option<String>> {
        self.writer.write_all(label.as_bytes()).await?;
        self.writer.flush().await?;
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn ask_image(&mut self, label: &str) -> Result<Option<ImageRef>> {
        loop {
            let Some(input) = self.ask(label).await? else {
                return Ok(None);
            };
            match ImageRef::parse(&input) {
                Ok(image) => return Ok(Some(image)),
                Err(err) => self.say(&format!("{err}. Please try again.")).await?,
            }
        }
    }

    async fn show_menu(&mut self, illustration_enabled: bool) -> Result<()> {
        self.say("").await?;
        self.say("What would you like to do next?").await?;
        self.say("  [1/A] Ask a follow-up question about the feedback").await?;
        self.say("  [2/N] Submit a new photo for re-evaluation").await?;
        self.say("  [3/Q] Quit").await?;
        if illustration_enabled {
            self.say("  [4/G] Generate an example photo that applies the feedback")
                .await?;
        }
        Ok(())
    }
}

async fn start(
    service: &FeedbackService,
    console: &mut Console<impl AsyncBufRead + Unpin, impl AsyncWrite + Unpin>,
) -> Result<LoopState> {
    let Some(image) = console
        .ask_image("Photo URL or file path: ")
        .await?
    else {
        return Ok(LoopState::Terminated);
    };
    let Some(preference) = console
        .ask("What look are you going for? ")
        .await?
    else {
        return Ok(LoopState::Terminated);
    };

    let mut timer = start_turn_timer("console", "initial_feedback", Some(1), Some(&preference));
    console.say("Analyzing your photo...").await?;
    match service.start_session(image, preference).await {
        Ok(session) => {
            console
                .say(&format!("\nFeedback:\n{}", session.latest_feedback()))
                .await?;
            drop(timer);
            if service.illustration_enabled() {
                illustrate(service, console, &session).await?;
            }
            Ok(LoopState::HasFeedback(session))
        }
        Err(err) => {
            timer.mark_status("error", Some(err.to_string()));
            console
                .say(&format!("Could not get feedback: {err}. Let's try again."))
                .await?;
            Ok(LoopState::AwaitingInitialInput)
        }
    }
}

async fn illustrate(
    service: &FeedbackService,
    console: &mut Console<impl AsyncBufRead + Unpin, impl AsyncWrite + Unpin>,
    session: &FeedbackSession,
) -> Result<()> {
    let mut timer = start_turn_timer("console", "illustrate", Some(session.turn_count()), None);
    console.say("Generating an example photo...").await?;
    match service.illustrate(session).await {
        Ok(illustration) => {
            info!(
                "Image request sent: {}",
                truncate_for_log(&illustration.request, 400)
            );
            console
                .say(&format!("\nScene:\n{}", illustration.scene_description))
                .await?;
            if !illustration.shot_types.is_empty() {
                let labels = illustration
                    .shot_types
                    .iter()
                    .map(|shot| shot.label())
                    .collect::<Vec<_>>()
                    .join(", ");
                console
                    .say(&format!("Recommended framing: {labels}"))
                    .await?;
            }
            match &illustration.output {
                IllustrationOutput::Saved(path) => {
                    console
                        .say(&format!("Example photo saved to {}", path.display()))
                        .await?
                }
                IllustrationOutput::Url(url) => {
                    console.say(&format!("Example photo: {url}")).await?
                }
            }
        }
        Err(err) => {
            timer.mark_status("error", Some(err.to_string()));
            warn!("Illustration failed: {err}");
            console
                .say(&format!("Could not generate an example photo: {err}"))
                .await?;
        }
    }
    Ok(())
}

async fn next_turn(
    service: &FeedbackService,
    console: &mut Console<impl AsyncBufRead + Unpin, impl AsyncWrite + Unpin>,
    mut session: FeedbackSession,
) -> Result<LoopState> {
    let illustration_enabled = service.illustration_enabled();
    console.show_menu(illustration_enabled).await?;
    let Some(input) = console.ask("> ").await? else {
        return Ok(LoopState::Terminated);
    };

    let Some(choice) = MenuChoice::parse(&input, illustration_enabled) else {
        console
            .say(&format!("Unknown option '{}'.", input.trim()))
            .await?;
        return Ok(LoopState::HasFeedback(session));
    };

    match choice {
        MenuChoice::Question => {
            let Some(question) = console.ask("Your question: ").await? else {
                return Ok(LoopState::Terminated);
            };
            let mut timer = start_turn_timer(
                "console",
                "followup",
                Some(session.turn_count()),
                Some(&question),
            );
            match service.answer_followup(&session, &question).await {
                Ok(answer) => console.say(&format!("\nAnswer:\n{answer}")).await?,
                Err(err) => {
                    timer.mark_status("error", Some(err.to_string()));
                    console
                        .say(&format!("Could not answer the question: {err}"))
                        .await?;
                }
            }
        }
        MenuChoice::NewPhoto => {
            let Some(image) = console
                .ask_image("New photo URL or file path: ")
                .await?
            else {
                return Ok(LoopState::Terminated);
            };
            let mut timer = start_turn_timer(
                "console",
                "reevaluation",
                Some(session.turn_count() + 1),
                Some(&image.to_string()),
            );
            console.say("Comparing with the previous feedback...").await?;
            match service.submit_new_photo(&mut session, image).await {
                Ok(feedback) => {
                    let message = format!("\nUpdated feedback:\n{feedback}");
                    console.say(&message).await?;
                }
                Err(err) => {
                    timer.mark_status("error", Some(err.to_string()));
                    console
                        .say(&format!(
                            "Could not evaluate the new photo: {err}. The previous feedback still stands."
                        ))
                        .await?;
                }
            }
        }
        MenuChoice::Illustrate => illustrate(service, console, &session).await?,
        MenuChoice::Quit => return Ok(LoopState::Terminated),
    }

    Ok(LoopState::HasFeedback(session))
}

/// Runs the interactive feedback loop until the user quits or the input closes.
pub async fn run_console<R, W>(service: &FeedbackService, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut console = Console { reader, writer };
    console
        .say("Photo feedback assistant. Share a photo and the look you want.")
        .await?;

    let mut state = LoopState::AwaitingInitialInput;
    loop {
        state = match state {
            LoopState::AwaitingInitialInput => start(service, &mut console).await?,
            LoopState::HasFeedback(session) => next_turn(service, &mut console, session).await?,
            LoopState::Terminated => break,
        };
    }

    info!("Console session ended");
    console.say("Goodbye!").await?;
    Ok(())
}

pub async fn run_stdio(service: &FeedbackService) -> Result<()> {
    run_console(
        service,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::llm::gateway::fake::ScriptedGateway;
    use crate::llm::gateway::{GatewayError, GeneratedImage};

    async fn run_script(gateway: Arc<ScriptedGateway>, input: &str) -> String {
        let service = FeedbackService::new(gateway, &Config::for_tests());
        let mut output = Vec::new();
        run_console(&service, input.as_bytes(), &mut output)
            .await
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn menu_accepts_numbers_letters_and_words() {
        assert_eq!(MenuChoice::parse("1", false), Some(MenuChoice::Question));
        assert_eq!(MenuChoice::parse(" A ", false), Some(MenuChoice::Question));
        assert_eq!(MenuChoice::parse("q", false), Some(MenuChoice::Quit));
        assert_eq!(MenuChoice::parse(" Q ", true), Some(MenuChoice::Quit));
        assert_eq!(MenuChoice::parse("n", false), Some(MenuChoice::NewPhoto));
        assert_eq!(MenuChoice::parse("EXIT", false), Some(MenuChoice::Quit));
        assert_eq!(MenuChoice::parse("4", false), None);
        assert_eq!(MenuChoice::parse("g", true), Some(MenuChoice::Illustrate));
        assert_eq!(MenuChoice::parse("maybe", true), None);
    }

    #[tokio::test]
    async fn full_conversation() {
        let gateway = Arc::new(ScriptedGateway::with_replies([
            Ok("Raise the camera to eye level.".to_string()),
            Ok("Hold it at about the height of your eyes.".to_string()),
            Ok("80/100. The angle is fixed; the background is still busy.".to_string()),
        ]));
        let output = run_script(
            gateway.clone(),
            "https://example.com/a.jpg\nnatural look\n1\nHow high?\n2\nhttps://example.com/b.jpg\n3\n",
        )
        .await;

        assert!(output.contains("Raise the camera to eye level."));
        assert!(output.contains("Hold it at about the height of your eyes."));
        assert!(output.contains("80/100. The angle is fixed"));
        assert!(output.ends_with("Goodbye!\n"));
        assert!(!output.contains("[4/G]"));
        assert_eq!(gateway.recorded_prompts().len(), 3);
    }

    #[tokio::test]
    async fn closed_input_ends_the_session() {
        let gateway = Arc::new(ScriptedGateway::default());
        let output = run_script(gateway.clone(), "").await;
        assert!(output.ends_with("Goodbye!\n"));
        assert!(gateway.recorded_prompts().is_empty());
    }

    #[tokio::test]
    async fn failed_first_critique_asks_again() {
        let gateway = Arc::new(ScriptedGateway::with_replies([
            Err(GatewayError::Upstream("timeout".to_string())),
            Ok("Looks sharp.".to_string()),
        ]));
        let output = run_script(
            gateway.clone(),
            "https://example.com/a.jpg\nsharp\nhttps://example.com/a.jpg\nsharp\ne\n",
        )
        .await;

        assert!(output.contains("Could not get feedback"));
        assert!(output.contains("Looks sharp."));
        assert_eq!(gateway.recorded_prompts().len(), 2);
    }

    #[tokio::test]
    async fn invalid_photo_reference_is_reprompted() {
        let gateway = Arc::new(ScriptedGateway::with_replies([Ok("Nice.".to_string())]));
        let output = run_script(
            gateway,
            "/definitely/not/here.jpg\nhttps://example.com/a.jpg\nany\nquit\n",
        )
        .await;

        assert!(output.contains("neither an http(s) URL nor an existing file"));
        assert!(output.contains("Nice."));
    }

    #[tokio::test]
    async fn failed_reevaluation_keeps_previous_feedback() {
        let gateway = Arc::new(ScriptedGateway::with_replies([
            Ok("Step closer.".to_string()),
            Err(GatewayError::Upstream("rate limited".to_string())),
            Ok("You asked about stepping closer.".to_string()),
        ]));
        let output = run_script(
            gateway.clone(),
            "https://example.com/a.jpg\nclose-up\nn\nhttps://example.com/b.jpg\na\nwhat did you say?\ne\n",
        )
        .await;

        assert!(output.contains("The previous feedback still stands."));
        let followup = &gateway.recorded_prompts()[2];
        assert!(followup.text.contains("Step closer."));
    }

    #[tokio::test]
    async fn unknown_option_and_hidden_illustration() {
        let gateway = Arc::new(ScriptedGateway::with_replies([Ok("Fine.".to_string())]));
        let output = run_script(gateway, "https://example.com/a.jpg\nany\n4\n3\n").await;
        assert!(output.contains("Unknown option '4'."));
    }

    #[tokio::test]
    async fn configured_backend_illustrates_after_first_critique() {
        let gateway = Arc::new(
            ScriptedGateway::with_replies([
                Ok("Try a lower angle.".to_string()),
                Ok("A runner on a track at dusk.".to_string()),
                Ok("from below\nfull body".to_string()),
            ])
            .with_images([Ok(GeneratedImage::Url(
                "https://images.example.com/example.png".to_string(),
            ))]),
        );
        let output = run_script(gateway, "https://example.com/a.jpg\nathletic\n3\n").await;

        assert!(output.contains("Recommended framing: from-below, full body"));
        assert!(output.contains("Example photo: https://images.example.com/example.png"));
        assert!(output.contains("[4/G]"));
    }
}
