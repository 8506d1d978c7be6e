pub mod app;
pub mod helpdesk;

pub use app::{DemoSession, HelpdeskClient, SessionReport};
pub use helpdesk::{HelpdeskBackend, NewTicket, SimulatedHelpdesk, Ticket, TicketStatus};
