use frogvpn_db::models::Product;

use crate::flash_sale::{apply_discount, HOUR_CHOICES, PERCENT_CHOICES, QUICK_PRESETS};
use crate::transport::{Button, Keyboard};
use crate::triggers::CallbackData;

fn button(label: impl Into<String>, data: CallbackData) -> Button {
    Button::callback(label, data.encode())
}

/// Splits buttons into rows of `width`.
fn grid(buttons: Vec<Button>, width: usize) -> Vec<Vec<Button>> {
    buttons
        .chunks(width.max(1))
        .map(|row| row.to_vec())
        .collect()
}

pub fn main_menu() -> Keyboard {
    Keyboard::new(vec![
        vec![button("💎 Plans", CallbackData::Tariffs)],
        vec![
            button("🔑 My subscriptions", CallbackData::MySubs),
            button("💰 Balance", CallbackData::Balance),
        ],
        vec![
            button("🎟 Promo code", CallbackData::PromoEnter),
            button("👥 Invite friends", CallbackData::Referral),
        ],
        vec![button("🆘 Support", CallbackData::Support)],
    ])
}

pub fn back_main() -> Keyboard {
    Keyboard::single(button("🏠 Main menu", CallbackData::BackMain))
}

pub fn products(products: &[Product]) -> Keyboard {
    let mut rows: Vec<Vec<Button>> = products
        .iter()
        .map(|p| vec![button(p.title(), CallbackData::Product(p.id))])
        .collect();
    rows.push(vec![button("⬅️ Back", CallbackData::BackMain)]);
    Keyboard::new(rows)
}

pub fn plans(product: &Product, sale_percent: u32) -> Keyboard {
    let mut rows: Vec<Vec<Button>> = product
        .plans()
        .into_iter()
        .map(|plan| {
            let price = apply_discount(plan.price, sale_percent);
            let mut label = format!("{} mo · {:.0} ₽", plan.months, price);
            if plan.discount_percent > 0 {
                label.push_str(&format!(" (-{}%)", plan.discount_percent));
            }
            vec![button(
                label,
                CallbackData::Plan {
                    product_id: product.id,
                    months: plan.months,
                },
            )]
        })
        .collect();
    rows.push(vec![button("⬅️ Back", CallbackData::Tariffs)]);
    Keyboard::new(rows)
}

pub fn checkout(product_id: i64, months: u32) -> Keyboard {
    Keyboard::new(vec![
        vec![button(
            "💳 Pay from balance",
            CallbackData::PayBalance { product_id, months },
        )],
        vec![button("⬅️ Back", CallbackData::Product(product_id))],
    ])
}

pub fn top_up() -> Keyboard {
    Keyboard::new(vec![
        vec![button("💬 Top up via support", CallbackData::SupportEnter)],
        vec![button("🏠 Main menu", CallbackData::BackMain)],
    ])
}

pub fn promo_retry() -> Keyboard {
    Keyboard::new(vec![
        vec![button("🎟 Try another code", CallbackData::PromoEnter)],
        vec![button("🏠 Main menu", CallbackData::BackMain)],
    ])
}

pub fn referral(page: Option<u32>, total_pages: u32) -> Keyboard {
    let mut rows = Vec::new();
    match page {
        None => rows.push(vec![button("📋 My referrals", CallbackData::ReferralList(1))]),
        Some(page) => {
            let mut nav = Vec::new();
            if page > 1 {
                nav.push(button("◀️", CallbackData::ReferralList(page - 1)));
            }
            if page < total_pages {
                nav.push(button("▶️", CallbackData::ReferralList(page + 1)));
            }
            if !nav.is_empty() {
                rows.push(nav);
            }
            rows.push(vec![button("⬅️ Back", CallbackData::Referral)]);
        }
    }
    rows.push(vec![button("🏠 Main menu", CallbackData::BackMain)]);
    Keyboard::new(rows)
}

pub fn support_hub() -> Keyboard {
    Keyboard::new(vec![
        vec![button("✍️ Write to support", CallbackData::SupportEnter)],
        vec![button("🏠 Main menu", CallbackData::BackMain)],
    ])
}

pub fn support_session() -> Keyboard {
    Keyboard::new(vec![vec![
        button("✅ Issue solved", CallbackData::TicketSolve),
        button("🚪 Leave chat", CallbackData::SupportExit),
    ]])
}

pub fn admin_panel() -> Keyboard {
    Keyboard::new(vec![
        vec![
            button("📊 Statistics", CallbackData::AdminStats),
            button("📢 Broadcast", CallbackData::Broadcast),
        ],
        vec![
            button("🔑 Issue key", CallbackData::Issue),
            button("🔍 Find user", CallbackData::FindUser),
        ],
        vec![
            button("🎟 Promo codes", CallbackData::PromoMenu),
            button("🏆 Top referrers", CallbackData::TopReferrers),
        ],
        vec![button("🔥 Flash sale", CallbackData::FlashMenu)],
    ])
}

pub fn back_admin() -> Keyboard {
    Keyboard::single(button("⬅️ Admin panel", CallbackData::AdminPanel))
}

pub fn broadcast_cancel() -> Keyboard {
    Keyboard::single(button("❌ Cancel", CallbackData::BroadcastCancel))
}

pub fn broadcast_confirm() -> Keyboard {
    Keyboard::new(vec![vec![
        button("✅ Send", CallbackData::BroadcastConfirm),
        button("❌ Cancel", CallbackData::BroadcastCancel),
    ]])
}

pub fn broadcast_running() -> Keyboard {
    Keyboard::single(button("⏹ Stop", CallbackData::BroadcastStop))
}

pub fn issue_products(products: &[Product]) -> Keyboard {
    let mut rows: Vec<Vec<Button>> = products
        .iter()
        .map(|p| vec![button(p.title(), CallbackData::IssueProduct(p.id))])
        .collect();
    rows.push(vec![button("❌ Cancel", CallbackData::IssueCancel)]);
    Keyboard::new(rows)
}

pub const ISSUE_DAYS: [u32; 4] = [30, 90, 180, 365];

pub fn issue_days() -> Keyboard {
    let days = ISSUE_DAYS
        .iter()
        .map(|&d| button(format!("{} days", d), CallbackData::IssueDays(d)))
        .collect();
    let mut rows = grid(days, 2);
    rows.push(vec![button("❌ Cancel", CallbackData::IssueCancel)]);
    Keyboard::new(rows)
}

pub fn issue_target() -> Keyboard {
    Keyboard::new(vec![
        vec![button("🔓 Key without a user", CallbackData::IssueNoUser)],
        vec![button("❌ Cancel", CallbackData::IssueCancel)],
    ])
}

pub fn issue_done() -> Keyboard {
    Keyboard::new(vec![
        vec![button("🔑 Issue another", CallbackData::Issue)],
        vec![button("⬅️ Admin panel", CallbackData::AdminPanel)],
    ])
}

pub fn user_card(telegram_id: i64) -> Keyboard {
    Keyboard::new(vec![
        vec![
            button("🎁 Gift key", CallbackData::GiftUser(telegram_id)),
            button("💰 Add balance", CallbackData::AddBalance(telegram_id)),
        ],
        vec![button("✍️ Message", CallbackData::ReplyTicket(telegram_id))],
        vec![button("⬅️ Admin panel", CallbackData::AdminPanel)],
    ])
}

pub const QUICK_AMOUNTS: [u32; 3] = [100, 450, 1000];

pub fn add_balance(telegram_id: i64) -> Keyboard {
    let quick = QUICK_AMOUNTS
        .iter()
        .map(|&amount| {
            button(
                format!("+{} ₽", amount),
                CallbackData::AddBalanceAmount {
                    user: telegram_id,
                    amount,
                },
            )
        })
        .collect();
    Keyboard::new(vec![
        quick,
        vec![button("⬅️ Admin panel", CallbackData::AdminPanel)],
    ])
}

pub fn reply_cancel() -> Keyboard {
    Keyboard::single(button("❌ Cancel reply", CallbackData::CancelReply))
}

pub fn promo_menu() -> Keyboard {
    Keyboard::new(vec![
        vec![
            button("➕ Create", CallbackData::PromoCreate),
            button("📋 List", CallbackData::PromoList),
        ],
        vec![
            button("🗑 Deactivate", CallbackData::PromoDelete),
            button("📈 Stats", CallbackData::PromoStats),
        ],
        vec![button("⬅️ Admin panel", CallbackData::AdminPanel)],
    ])
}

pub fn promo_cancel() -> Keyboard {
    Keyboard::single(button("❌ Cancel", CallbackData::PromoCancel))
}

pub fn back_promo() -> Keyboard {
    Keyboard::single(button("⬅️ Promo codes", CallbackData::PromoMenu))
}

pub fn flash_menu(active: bool) -> Keyboard {
    let mut rows = Vec::new();
    if active {
        rows.push(vec![button("⏹ Stop sale", CallbackData::FlashStop)]);
    }
    let presets = QUICK_PRESETS
        .iter()
        .map(|&(percent, hours)| {
            button(
                format!("-{}% / {}h", percent, hours),
                CallbackData::FlashQuick { percent, hours },
            )
        })
        .collect();
    rows.extend(grid(presets, 2));
    rows.push(vec![button("⚙️ Custom", CallbackData::FlashManual)]);
    rows.push(vec![button("⬅️ Admin panel", CallbackData::AdminPanel)]);
    Keyboard::new(rows)
}

pub fn flash_percent() -> Keyboard {
    let choices = PERCENT_CHOICES
        .iter()
        .map(|&p| button(format!("-{}%", p), CallbackData::FlashPercent(p)))
        .collect();
    let mut rows = grid(choices, 3);
    rows.push(vec![button("❌ Cancel", CallbackData::FlashCancel)]);
    Keyboard::new(rows)
}

pub fn flash_hours() -> Keyboard {
    let choices = HOUR_CHOICES
        .iter()
        .map(|&h| button(format!("{}h", h), CallbackData::FlashHours(h)))
        .collect();
    let mut rows = grid(choices, 3);
    rows.push(vec![button("❌ Cancel", CallbackData::FlashCancel)]);
    Keyboard::new(rows)
}

pub fn flash_confirm() -> Keyboard {
    Keyboard::new(vec![vec![
        button("🚀 Launch", CallbackData::FlashConfirm),
        button("❌ Cancel", CallbackData::FlashCancel),
    ]])
}
