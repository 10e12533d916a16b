use std::time::Duration;

use matches::assert_matches;

use crypto_relay::dev::Simulation;
use crypto_relay::evote::{tags, EVotePhase, Preset};
use crypto_relay::{
    Ballot, CryptoClient, CryptoServer, EVoteError, Error, ListFormat, ServerConfig, Vote,
};

mod common;
use common::{Log, Recorder};

use Vote::{No, Yes};

#[tokio::test]
async fn ballots_are_tallied_among_registered_clients() {
    let mut simulation = Simulation::launch(ServerConfig::default());
    for name in ["c1", "c2", "c3", "c4"] {
        simulation.connect(name).await.unwrap();
    }
    let server = simulation.server().clone();

    simulation.preset_votes([Yes, No, Yes, No]);
    assert_eq!(server.initiate_evote("pizza?").await.unwrap(), "(2,2)");
    simulation.preset_votes([No, Yes, No, Yes]);
    assert_eq!(server.initiate_evote("pasta?").await.unwrap(), "(2,2)");

    assert!(simulation.disconnect("c1").await.unwrap());
    simulation.preset_votes([No, No, No]);
    assert_eq!(server.initiate_evote("salad?").await.unwrap(), "(0,3)");

    simulation.connect("c5").await.unwrap();
    simulation.preset_votes([Yes, Yes, Yes, Yes]);
    assert_eq!(server.initiate_evote("cake?").await.unwrap(), "(4,0)");

    for voter in simulation.voters() {
        assert_eq!(
            voter.client.vote_phase().map(|s| s.phase),
            Some(EVotePhase::Result)
        );
        assert!(!voter.client.is_voting().await);
    }
}

#[tokio::test]
async fn unresponsive_voter_makes_ballot_time_out() {
    let config = ServerConfig::default().with_evote_timeout(Duration::from_secs(1));
    let mut simulation = Simulation::launch(config);
    for name in ["c1", "c2", "c3", "c4"] {
        simulation.connect(name).await.unwrap();
    }
    simulation.preset_votes([
        Preset::Vote(Yes),
        Preset::Withhold,
        Preset::Vote(No),
        Preset::Vote(No),
    ]);

    assert_matches!(
        simulation.server().run_evote("anyone there?").await,
        Err(Error::EVote(EVoteError::Timeout(_)))
    );
    for voter in simulation.voters() {
        assert_eq!(
            voter.client.vote_phase().map(|s| s.phase),
            Some(EVotePhase::Aborted)
        );
        assert!(!voter.client.is_voting().await);
    }
    // nobody is to blame for a timeout
    assert_eq!(
        simulation
            .server()
            .client_list(ListFormat::Array)
            .await
            .unwrap(),
        "[c1, c2, c3, c4]"
    );

    simulation.preset_votes([No, Yes, No, No]);
    assert_eq!(
        simulation.server().initiate_evote("second try").await.unwrap(),
        "(1,3)"
    );
}

#[tokio::test]
async fn timed_out_ballot_reports_empty_tally() {
    let config = ServerConfig::default().with_evote_timeout(Duration::from_millis(300));
    let mut simulation = Simulation::launch(config);
    simulation.connect("c1").await.unwrap();
    simulation.preset_votes([Preset::Withhold]);

    assert_eq!(
        simulation.server().initiate_evote("hello?").await.unwrap(),
        ""
    );
}

#[tokio::test]
async fn client_takes_part_in_one_ballot_at_a_time() {
    let mut simulation = Simulation::launch(ServerConfig::default());
    let voter = simulation.connect("c1").await.unwrap().clone();
    voter.decision.set(Preset::Withhold);
    let voters = ["c1".to_owned()].into_iter().collect();

    let first = tokio::spawn({
        let client = voter.client.clone();
        let ballot = Ballot::new("first", voters);
        async move { client.evote(ballot).await }
    });
    while !voter.client.is_voting().await {
        tokio::task::yield_now().await;
    }

    let second = Ballot::new("second", ["c1".to_owned()].into_iter().collect());
    assert_matches!(
        voter.client.evote(second).await,
        Err(Error::EVote(EVoteError::AlreadyVoting { name })) if name == "c1"
    );

    voter.client.evote_abort("changed my mind").await.unwrap();
    assert_matches!(first.await.unwrap(), Err(Error::Cancelled));
    assert!(!voter.client.is_voting().await);
    assert_eq!(
        voter.client.vote_phase().map(|s| s.phase),
        Some(EVotePhase::Aborted)
    );
}

#[tokio::test]
async fn failed_voter_is_unregistered_and_others_abort() {
    let mut simulation = Simulation::launch(ServerConfig::default());
    for name in ["c1", "c2"] {
        simulation.connect(name).await.unwrap();
    }
    let log = Log::default();
    simulation
        .server()
        .register_client(Recorder::new("mallory", &log))
        .await
        .unwrap();

    assert_matches!(
        simulation.server().run_evote("trust mallory?").await,
        Err(Error::EVote(EVoteError::VoterFailed { voter, .. })) if voter == "mallory"
    );
    assert_eq!(
        simulation
            .server()
            .client_list(ListFormat::Array)
            .await
            .unwrap(),
        "[c1, c2]"
    );
    for voter in simulation.voters() {
        assert_eq!(
            voter.client.vote_phase().map(|s| s.phase),
            Some(EVotePhase::Aborted)
        );
        assert!(!voter.client.is_voting().await);
    }

    simulation.preset_votes([Yes, Yes]);
    assert_eq!(
        simulation.server().initiate_evote("without mallory").await.unwrap(),
        "(2,0)"
    );
}

#[tokio::test]
async fn ballot_without_clients_is_cancelled() {
    let simulation = Simulation::launch(ServerConfig::default());
    assert_matches!(
        simulation.server().run_evote("anyone?").await,
        Err(Error::EVote(EVoteError::NoVoters))
    );
    assert_eq!(simulation.server().initiate_evote("anyone?").await.unwrap(), "");
}

#[tokio::test]
async fn voters_observe_each_others_contributions() {
    let mut simulation = Simulation::launch(ServerConfig::default());
    for name in ["c1", "c2", "c3"] {
        simulation.connect(name).await.unwrap();
    }
    simulation.preset_votes([Yes, Yes, No]);
    assert_eq!(
        simulation.server().initiate_evote("movie night?").await.unwrap(),
        "(2,1)"
    );

    let c1 = &simulation.voter("c1").unwrap().client;
    // c1 doesn't get copies of its own contributions
    assert!(c1.history("c1", "voters").await.is_empty());

    let observed = c1.history("c2", "voters").await;
    let labels: Vec<_> = observed.iter().map(|m| m.tag.as_deref()).collect();
    assert_eq!(
        labels,
        [
            Some(tags::SECRET_KEY_PARTITION),
            Some(tags::ENCRYPTED_VOTE),
            Some(tags::DECRYPTION_KEY_PARTITION),
        ]
    );
    for msg in &observed {
        assert_eq!(msg.session_id, None);
    }
    let encrypted_vote = &observed[1];
    assert!(encrypted_vote.is_encrypted());
    assert!(encrypted_vote.plaintext.is_empty());
    assert!(encrypted_vote.encryption_state.is_some());

    // broadcasts of the server are addressed to every voter
    assert_eq!(c1.history("server", "c1").await.len(), 3);
}
