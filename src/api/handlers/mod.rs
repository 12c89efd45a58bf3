mod internal;
mod locations;
mod schools;
mod sessions;

pub use internal::health;
pub use locations::{
    create_check_in, create_location, delete_check_in, delete_location, get_location,
    list_check_ins, list_locations, update_capacity,
};
pub use schools::{create_school, get_school};
pub use sessions::{create_session, current_session, refresh_session, sign_out, sign_out_everywhere};
