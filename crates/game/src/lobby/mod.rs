mod preference;
mod session;
mod status;
mod substate;

pub use preference::{
    DEFAULT_SCORE_INDEX, Preferences, RulesResolver, SCORE_CHOICES, ScriptRulesResolver,
    closest_index,
};
pub(crate) use preference::script_field;
pub use session::{
    ConnectionState, LobbySession, MatchHandoff, SessionError, SessionOrigin, resolve_server,
};
pub use status::{GameStatus, OpenGame, ServerStatusData, speed_percent};
pub use substate::{GameSubstate, LobbySubstate, MainSubstate, SubstateEvent};
