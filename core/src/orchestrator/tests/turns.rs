use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::ambient::{AmbientMixer, Track};
use crate::error::{ErrorClass, SynthesisError, VoiceError};
use crate::orchestrator::config::VoiceConfig;
use crate::orchestrator::controller::{SessionContext, TurnController, TurnDeps};
use crate::orchestrator::types::{
    DialogKind, NoticeLevel, SessionEvent, SpeakerRole, TurnPhase,
};
use crate::speech::{EndReason, SpeechBackend, SpeechEvent, SpeechQueue};
use crate::test_support::{
    MockAmbientOutput, MockOutput, MockRecognizer, MockSynthesizer, ScriptedGenerator,
};
use crate::transcription::{Credentials, TranscriptSegment, TranscriptionSession};

struct Harness {
    controller: TurnController,
    generator: Arc<ScriptedGenerator>,
    synthesizer: Arc<MockSynthesizer>,
    output: Arc<MockOutput>,
    recognizer: Arc<MockRecognizer>,
    events: broadcast::Receiver<SessionEvent>,
}

fn harness(clip: Duration) -> Harness {
    build(VoiceConfig::default(), MockOutput::with_clip(clip), None)
}

fn build(
    config: VoiceConfig,
    output: Arc<MockOutput>,
    mixer: Option<Arc<AmbientMixer>>,
) -> Harness {
    let generator = ScriptedGenerator::new();
    let synthesizer = MockSynthesizer::new();
    let recognizer = MockRecognizer::new();

    let (queue, speech_events) = SpeechQueue::spawn(
        config.speech.clone(),
        Some(SpeechBackend::new(synthesizer.clone(), output.clone())),
    );
    let transcription =
        TranscriptionSession::new(recognizer.clone(), Some(Credentials::new("test-key")));
    let context = SessionContext::new("test-session", config);
    let events = context.subscribe();
    let controller = TurnController::new(
        context,
        TurnDeps {
            generator: generator.clone(),
            queue,
            speech_events,
            transcription,
            mixer,
            dialog_log: None,
        },
    );

    Harness {
        controller,
        generator,
        synthesizer,
        output,
        recognizer,
        events,
    }
}

/// Lets spawned tasks run; paused time only moves once everything is idle.
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

async fn listening(controller: &TurnController) {
    controller
        .wait_for_phase(TurnPhase::UserListening)
        .await
        .expect("floor returns to the user");
}

async fn reach(controller: &TurnController, target: TurnPhase) {
    let mut phase = controller.subscribe_phase();
    phase
        .wait_for(|phase| *phase == target)
        .await
        .expect("phase channel open");
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn phases(events: &[SessionEvent]) -> Vec<TurnPhase> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

fn kinds(controller: &TurnController) -> Vec<DialogKind> {
    controller.history().iter().map(|entry| entry.kind).collect()
}

#[tokio::test(start_paused = true)]
async fn full_turn_speaks_thoughts_then_response() {
    let mut h = harness(Duration::from_millis(500));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    settle().await;
    assert_eq!(h.recognizer.connects(), 1);
    drain(&mut h.events);

    h.generator.respond(
        &[
            (SpeakerRole::Instinct, "Run."),
            (SpeakerRole::Logic, "Think first."),
        ],
        "Let's make a plan.",
    );
    let turn_id = h
        .controller
        .begin_ai_turn("Help me decide")
        .await
        .expect("turn starts");
    assert_eq!(turn_id, 2);
    listening(&h.controller).await;
    settle().await;

    assert_eq!(
        h.output.played(),
        vec!["Run.", "Think first.", "Let's make a plan."]
    );
    let voices: Vec<String> = h
        .synthesizer
        .calls()
        .into_iter()
        .map(|(voice, _)| voice)
        .collect();
    assert_eq!(voices, vec!["instinct", "logic", "governor"]);

    assert_eq!(
        kinds(&h.controller),
        vec![
            DialogKind::User,
            DialogKind::Thought,
            DialogKind::Thought,
            DialogKind::Response
        ]
    );
    let history = h.controller.history();
    assert!(history.iter().all(|entry| entry.turn_id == turn_id));
    assert_eq!(history[0].text, "Help me decide");
    assert_eq!(history[3].speaker, SpeakerRole::Governor);

    assert_eq!(
        phases(&drain(&mut h.events)),
        vec![
            TurnPhase::AiThinking,
            TurnPhase::AiSpeakingThoughts,
            TurnPhase::AiSpeakingResponse,
            TurnPhase::UserListening
        ]
    );
    assert_eq!(h.recognizer.connects(), 2);
    assert_eq!(h.generator.requests(), vec!["Help me decide"]);
}

#[tokio::test(start_paused = true)]
async fn generation_failure_returns_the_floor_with_a_notice() {
    let mut h = harness(Duration::from_millis(200));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    drain(&mut h.events);

    h.generator.fail_next();
    let err = h
        .controller
        .begin_ai_turn("hello")
        .await
        .expect_err("generation fails");
    assert!(matches!(err, VoiceError::ResponseGeneration(_)));
    assert_eq!(err.class(), ErrorClass::FatalTurn);
    assert_eq!(h.controller.phase(), TurnPhase::UserListening);
    assert_eq!(kinds(&h.controller), vec![DialogKind::User]);

    let events = drain(&mut h.events);
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::Notice(notice) if notice.level == NoticeLevel::Error
    )));
    assert_eq!(
        phases(&events),
        vec![TurnPhase::AiThinking, TurnPhase::UserListening]
    );

    h.generator.respond(&[], "Second try worked.");
    h.controller
        .begin_ai_turn("hello again")
        .await
        .expect("session keeps going");
    listening(&h.controller).await;
    assert_eq!(h.output.played(), vec!["Second try worked."]);
}

#[tokio::test(start_paused = true)]
async fn synthesis_failure_shows_text_and_the_turn_continues() {
    let mut h = harness(Duration::from_millis(300));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    drain(&mut h.events);

    h.synthesizer
        .fail_on("Second thought.", SynthesisError::Request("503".into()));
    h.generator.respond(
        &[
            (SpeakerRole::Instinct, "First thought."),
            (SpeakerRole::Psyche, "Second thought."),
        ],
        "Final word.",
    );
    h.controller.begin_ai_turn("go").await.expect("turn starts");
    listening(&h.controller).await;
    settle().await;

    assert_eq!(h.output.played(), vec!["First thought.", "Final word."]);
    assert_eq!(kinds(&h.controller).len(), 4);

    let events = drain(&mut h.events);
    let failed = events
        .iter()
        .filter(|event| matches!(event, SessionEvent::Speech(SpeechEvent::Failed { .. })))
        .count();
    assert_eq!(failed, 1);
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::Speech(SpeechEvent::Ended { reason: EndReason::Failed, .. })
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::Notice(notice) if notice.level == NoticeLevel::Warn
    )));
}

#[tokio::test(start_paused = true)]
async fn skipping_the_governor_completes_the_turn_once() {
    let mut h = harness(Duration::from_secs(20));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    drain(&mut h.events);

    h.generator.respond(&[], "A very long answer.");
    let turn_id = h.controller.begin_ai_turn("talk").await.expect("turn starts");
    reach(&h.controller, TurnPhase::AiSpeakingResponse).await;
    settle().await;

    assert!(h.controller.skip_to_end_of_ai_turn().await);
    assert_eq!(h.controller.phase(), TurnPhase::UserListening);
    assert!(!h.controller.skip_to_end_of_ai_turn().await);
    assert!(!h.controller.end_ai_turn(turn_id).await);
    settle().await;

    assert_eq!(
        kinds(&h.controller),
        vec![DialogKind::User, DialogKind::Response]
    );
    let events = drain(&mut h.events);
    let responses = events
        .iter()
        .filter(|event| matches!(
            event,
            SessionEvent::Dialog(entry) if entry.kind == DialogKind::Response
        ))
        .count();
    assert_eq!(responses, 1);
    assert_eq!(
        phases(&events),
        vec![
            TurnPhase::AiThinking,
            TurnPhase::AiSpeakingResponse,
            TurnPhase::UserListening
        ]
    );
    assert!(h.output.stops() >= 1);
}

#[tokio::test(start_paused = true)]
async fn skip_to_end_during_thoughts_still_plays_the_response() {
    let h = harness(Duration::from_secs(5));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;

    h.generator.respond(
        &[
            (SpeakerRole::Instinct, "One."),
            (SpeakerRole::Logic, "Two."),
            (SpeakerRole::Psyche, "Three."),
        ],
        "Answer.",
    );
    h.controller.begin_ai_turn("go").await.expect("turn starts");
    reach(&h.controller, TurnPhase::AiSpeakingThoughts).await;
    settle().await;

    assert!(h.controller.skip_to_end_of_ai_turn().await);
    listening(&h.controller).await;

    assert_eq!(h.output.played(), vec!["One.", "Answer."]);
    assert_eq!(
        kinds(&h.controller),
        vec![
            DialogKind::User,
            DialogKind::Thought,
            DialogKind::Thought,
            DialogKind::Thought,
            DialogKind::Response
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn skip_while_thinking_records_everything_and_plays_nothing() {
    let h = harness(Duration::from_millis(500));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;

    h.generator.delay_by(Duration::from_secs(1));
    h.generator
        .respond(&[(SpeakerRole::Logic, "Hmm.")], "Never mind.");
    let controller = h.controller.clone();
    let turn = tokio::spawn(async move { controller.begin_ai_turn("think hard").await });
    settle().await;
    assert_eq!(h.controller.phase(), TurnPhase::AiThinking);

    assert!(h.controller.skip_to_end_of_ai_turn().await);
    turn.await.expect("turn task").expect("generation succeeds");
    listening(&h.controller).await;

    assert!(h.output.played().is_empty());
    assert_eq!(
        kinds(&h.controller),
        vec![DialogKind::User, DialogKind::Thought, DialogKind::Response]
    );
}

#[tokio::test(start_paused = true)]
async fn skip_while_the_microphone_closes_is_kept() {
    let h = harness(Duration::from_millis(500));
    h.recognizer.slow_disconnect(Duration::from_millis(500));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    settle().await;

    h.generator
        .respond(&[(SpeakerRole::Logic, "Hmm.")], "Answer.");
    let controller = h.controller.clone();
    let turn = tokio::spawn(async move { controller.begin_ai_turn("go").await });
    settle().await;
    assert_eq!(h.controller.phase(), TurnPhase::AiThinking);
    assert_eq!(h.recognizer.disconnects(), 0);

    assert!(h.controller.skip_to_end_of_ai_turn().await);
    turn.await.expect("turn task").expect("generation succeeds");
    listening(&h.controller).await;

    assert!(h.output.played().is_empty());
    assert_eq!(
        kinds(&h.controller),
        vec![DialogKind::User, DialogKind::Thought, DialogKind::Response]
    );
}

#[tokio::test(start_paused = true)]
async fn skip_current_moves_on_to_the_next_utterance() {
    let mut h = harness(Duration::from_secs(5));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    assert!(!h.controller.skip_current_utterance());
    drain(&mut h.events);

    h.generator
        .respond(&[(SpeakerRole::Instinct, "Cut me off.")], "Done.");
    h.controller.begin_ai_turn("go").await.expect("turn starts");
    reach(&h.controller, TurnPhase::AiSpeakingThoughts).await;
    settle().await;

    assert!(h.controller.skip_current_utterance());
    listening(&h.controller).await;

    assert_eq!(h.output.played(), vec!["Cut me off.", "Done."]);
    let events = drain(&mut h.events);
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::Speech(SpeechEvent::Ended { reason: EndReason::Skipped, .. })
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::Speech(SpeechEvent::Ended { reason: EndReason::Completed, .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn greeting_is_spoken_before_the_first_user_turn() {
    let h = harness(Duration::from_millis(400));
    h.generator.greet_with("Welcome back.");

    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;

    assert_eq!(h.output.played(), vec!["Welcome back."]);
    let history = h.controller.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, DialogKind::Response);
    assert_eq!(history[0].speaker, SpeakerRole::Governor);
    assert_eq!(history[0].turn_id, 1);

    let err = h.controller.start_session().await.expect_err("second start");
    assert!(matches!(err, VoiceError::AlreadyStarted));
}

#[tokio::test(start_paused = true)]
async fn spoken_submit_hands_the_floor_to_the_ai() {
    let h = harness(Duration::from_millis(200));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    settle().await;

    h.generator.respond(&[], "Table booked.");
    h.recognizer
        .push(TranscriptSegment::committed("book the table", 100));
    h.recognizer.push(TranscriptSegment::partial("submit", 200));

    let mut phase = h.controller.subscribe_phase();
    phase
        .wait_for(|phase| phase.is_ai())
        .await
        .expect("phase channel open");
    listening(&h.controller).await;

    assert_eq!(h.generator.requests(), vec!["book the table"]);
    assert_eq!(h.controller.history()[0].text, "book the table");
    assert_eq!(h.output.played(), vec!["Table booked."]);
}

#[tokio::test(start_paused = true)]
async fn submit_used_in_a_sentence_keeps_listening() {
    let h = harness(Duration::from_millis(200));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    settle().await;

    h.recognizer
        .push(TranscriptSegment::committed("I will submit the form tomorrow", 100));
    sleep(Duration::from_secs(1)).await;

    assert_eq!(h.controller.phase(), TurnPhase::UserListening);
    assert!(h.generator.requests().is_empty());
    assert_eq!(
        h.controller.transcript().committed,
        "I will submit the form tomorrow"
    );
}

#[tokio::test(start_paused = true)]
async fn begin_requires_a_listening_phase_and_some_text() {
    let h = harness(Duration::from_millis(200));
    let err = h
        .controller
        .begin_ai_turn("too early")
        .await
        .expect_err("not listening yet");
    assert!(matches!(err, VoiceError::InvalidPhase { .. }));

    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    let err = h
        .controller
        .begin_ai_turn("   ")
        .await
        .expect_err("blank input");
    assert!(matches!(err, VoiceError::EmptyInput));
    assert_eq!(h.controller.phase(), TurnPhase::UserListening);
    assert!(h.generator.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_playback_still_returns_the_floor() {
    let mut config = VoiceConfig::default();
    config.turn.response_timeout = Duration::from_secs(1);
    config.turn.watchdog_grace = Duration::from_secs(1);
    let h = build(config, MockOutput::hanging(), None);
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;

    h.generator.respond(&[], "Nobody hears this.");
    h.controller.begin_ai_turn("hello").await.expect("turn starts");
    listening(&h.controller).await;

    assert_eq!(kinds(&h.controller), vec![DialogKind::User, DialogKind::Response]);
    assert!(h.output.stops() >= 1);
}

#[tokio::test(start_paused = true)]
async fn thinking_cue_plays_between_thoughts() {
    let ambient = MockAmbientOutput::new();
    let mixer = Arc::new(AmbientMixer::spawn(ambient.clone(), VoiceConfig::default().ambient));
    mixer.set_cue(Some(Track::new("cue", "Cue", "cue.wav")));
    let h = build(
        VoiceConfig::default(),
        MockOutput::with_clip(Duration::from_millis(500)),
        Some(mixer),
    );
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;

    h.generator.respond(
        &[
            (SpeakerRole::Instinct, "First."),
            (SpeakerRole::Logic, "Second."),
        ],
        "Done.",
    );
    h.controller.begin_ai_turn("go").await.expect("turn starts");
    listening(&h.controller).await;
    sleep(Duration::from_secs(1)).await;

    let cues = ambient
        .opened()
        .iter()
        .filter(|track| track.track_id == "cue")
        .count();
    assert_eq!(cues, 1);
}

#[tokio::test(start_paused = true)]
async fn music_is_ducked_while_the_ai_speaks() {
    let ambient = MockAmbientOutput::new();
    let mixer = Arc::new(AmbientMixer::spawn(ambient.clone(), VoiceConfig::default().ambient));
    mixer.set_tracks(vec![Track::new("rain", "Rain", "music/rain.ogg")]);
    sleep(Duration::from_secs(1)).await;
    mixer.start();
    let h = build(
        VoiceConfig::default(),
        MockOutput::with_clip(Duration::from_millis(500)),
        Some(mixer),
    );
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;
    settle().await;
    let music = ambient.opened()[0].clone();
    assert!((music.last_volume() - 0.3).abs() < 1e-4);

    h.generator.respond(&[], "Answer.");
    h.controller.begin_ai_turn("go").await.expect("turn starts");
    reach(&h.controller, TurnPhase::AiSpeakingResponse).await;
    settle().await;
    assert!((music.last_volume() - 0.15).abs() < 1e-4);

    listening(&h.controller).await;
    settle().await;
    assert!((music.last_volume() - 0.3).abs() < 1e-4);
}

#[tokio::test(start_paused = true)]
async fn end_session_is_terminal() {
    let h = harness(Duration::from_secs(30));
    h.controller.start_session().await.expect("start");
    listening(&h.controller).await;

    h.generator.respond(&[], "Interrupted answer.");
    h.controller.begin_ai_turn("go").await.expect("turn starts");
    reach(&h.controller, TurnPhase::AiSpeakingResponse).await;
    settle().await;

    h.controller.end_session().await;
    assert_eq!(h.controller.phase(), TurnPhase::Ended);
    assert!(h.output.stops() >= 1);

    let err = h
        .controller
        .begin_ai_turn("anyone there?")
        .await
        .expect_err("session is over");
    assert!(matches!(err, VoiceError::SessionEnded));
    assert!(matches!(
        h.controller.wait_for_phase(TurnPhase::UserListening).await,
        Err(VoiceError::SessionEnded)
    ));
    assert!(!h.controller.skip_to_end_of_ai_turn().await);

    h.controller.end_session().await;
    assert_eq!(h.controller.phase(), TurnPhase::Ended);
}
