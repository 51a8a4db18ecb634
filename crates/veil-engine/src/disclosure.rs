use tracing::instrument;

use veil_core::identity::Identity;
use veil_core::ids::UserId;
use veil_core::whisper::{visibility_tier, Whisper, WhisperView};
use veil_store::recognition::RecognitionRepo;
use veil_store::users::UserRepo;
use veil_store::whispers::WhisperRepo;

use crate::error::EngineError;

/// Outcome of a recognition guess. A repeat correct guess is neither of
/// these; it surfaces as `EngineError::RecognitionConflict`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuessOutcome {
    Correct,
    Incorrect,
}

/// The two identity-disclosure mechanics: visibility tiers fixed at message
/// creation, and the recognition edge that gates real-username exposure.
///
/// Tier math is stateless; recognition consistency is delegated to the
/// store's conditional insert, so concurrent guesses for the same pair
/// cannot double-add.
#[derive(Clone)]
pub struct DisclosureEngine {
    whispers: WhisperRepo,
    recognition: RecognitionRepo,
    users: UserRepo,
}

impl DisclosureEngine {
    pub fn new(whispers: WhisperRepo, recognition: RecognitionRepo, users: UserRepo) -> Self {
        Self {
            whispers,
            recognition,
            users,
        }
    }

    /// Tier for a message about to be created between `sender` and
    /// `receiver`. The conversation volume includes the message being
    /// created, so the pair's tenth message is the first at tier 1.
    pub fn tier_for_new_whisper(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> Result<u8, EngineError> {
        let prior = self.whispers.count_between(sender, receiver)?;
        Ok(visibility_tier(prior + 1))
    }

    /// Compare `guessed_name` against the target's real username
    /// (case-insensitive). A correct guess records the recognition edge;
    /// a correct guess by someone who already holds the edge is a
    /// protocol violation, not a wrong answer, and errors.
    #[instrument(skip(self, guessed_name), fields(guesser = %guesser, target = %target))]
    pub fn guess(
        &self,
        guesser: &UserId,
        target: &UserId,
        guessed_name: &str,
    ) -> Result<GuessOutcome, EngineError> {
        let identity = self.users.find_by_id(target)?;
        if !identity
            .username
            .eq_ignore_ascii_case(guessed_name.trim())
        {
            return Ok(GuessOutcome::Incorrect);
        }

        self.recognition.add(guesser, target)?;
        Ok(GuessOutcome::Correct)
    }

    /// Remove the guesser's forward edge. The historical edge on the
    /// target's side stays; revocation is asymmetric.
    #[instrument(skip(self), fields(guesser = %guesser, target = %target))]
    pub fn revoke(&self, guesser: &UserId, target: &UserId) -> Result<(), EngineError> {
        self.recognition.revoke(guesser, target)?;
        Ok(())
    }

    /// Whether `viewer` may see `target`'s real username. The sole
    /// authorization check for identity exposure.
    pub fn can_reveal(&self, viewer: &UserId, target: &UserId) -> Result<bool, EngineError> {
        Ok(self.recognition.has_recognized(viewer, target)?)
    }

    /// Everyone `user` currently recognizes.
    pub fn recognized(&self, user: &UserId) -> Result<Vec<UserId>, EngineError> {
        Ok(self.recognition.recognized_ids(user)?)
    }

    /// Everyone who has ever recognized `user`.
    pub fn recognizers(&self, user: &UserId) -> Result<Vec<UserId>, EngineError> {
        Ok(self.recognition.recognizer_ids(user)?)
    }

    /// Annotate a whisper for `viewer`: partner pseudonym always, real
    /// username only behind the recognition edge.
    pub fn annotate(&self, whisper: Whisper, viewer: &UserId) -> Result<WhisperView, EngineError> {
        let partner_id = if whisper.sender_id == *viewer {
            whisper.receiver_id.clone()
        } else {
            whisper.sender_id.clone()
        };
        let partner = self.users.find_by_id(&partner_id)?;
        self.view_against(whisper, viewer, &partner)
    }

    /// Annotate a whole conversation against one preloaded partner
    /// identity; the recognition edge is checked once, not per message.
    pub fn annotate_conversation(
        &self,
        whispers: Vec<Whisper>,
        viewer: &UserId,
        partner: &Identity,
    ) -> Result<Vec<WhisperView>, EngineError> {
        let reveal = self.can_reveal(viewer, &partner.id)?;
        Ok(whispers
            .into_iter()
            .map(|w| build_view(w, partner, reveal))
            .collect())
    }

    fn view_against(
        &self,
        whisper: Whisper,
        viewer: &UserId,
        partner: &Identity,
    ) -> Result<WhisperView, EngineError> {
        let reveal = self.can_reveal(viewer, &partner.id)?;
        Ok(build_view(whisper, partner, reveal))
    }
}

fn build_view(whisper: Whisper, partner: &Identity, reveal: bool) -> WhisperView {
    WhisperView {
        whisper,
        partner_alias: partner.alias.clone(),
        partner_glyph: partner.avatar_glyph.clone(),
        partner_username: reveal.then(|| partner.username.clone()),
    }
}
